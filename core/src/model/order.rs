// orderflow/src/model/order.rs

use super::payment::PaymentMethod;
use super::status::{FulfillmentStatus, OrderStatus, PaymentStatus};
use crate::error::{OrderflowError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Address copied onto the order at creation so later address-book edits never reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSnapshot {
  pub full_name: String,
  pub line1: String,
  pub line2: Option<String>,
  pub city: String,
  pub state: Option<String>,
  pub zip: String,
  pub country: String,
  pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
  pub subtotal: Decimal,
  pub tax: Decimal,
  pub shipping: Decimal,
  pub discount: Decimal,
  pub total: Decimal,
}

impl OrderTotals {
  /// Largest drift tolerated between `total` and its parts.
  pub const TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

  /// Largest amount any stored money column can hold (`NUMERIC(12, 2)`).
  pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 2);

  /// Computes totals from `(unit_price, quantity)` lines. Tax is rounded to cents.
  pub fn compute(
    lines: impl IntoIterator<Item = (Decimal, i32)>,
    tax_rate: Decimal,
    shipping: Decimal,
    discount: Decimal,
  ) -> Result<Self> {
    let mut subtotal = Decimal::ZERO;
    for (price, qty) in lines {
      subtotal = subtotal
        .checked_add(Self::line_total(price, qty)?)
        .ok_or_else(|| too_large("subtotal"))?;
    }
    let subtotal = bounded("subtotal", subtotal)?;
    let tax = subtotal.checked_mul(tax_rate).ok_or_else(|| too_large("tax"))?.round_dp(2);
    let gross = subtotal
      .checked_add(tax)
      .and_then(|v| v.checked_add(shipping))
      .ok_or_else(|| too_large("order value"))?;
    if discount > gross {
      return Err(OrderflowError::Validation(format!(
        "discount {} exceeds order value {}",
        discount, gross
      )));
    }
    Ok(Self {
      subtotal,
      tax: bounded("tax", tax)?,
      shipping: bounded("shipping", shipping)?,
      discount: bounded("discount", discount)?,
      total: bounded("total", gross - discount)?,
    })
  }

  /// `price * qty`, rejected once it no longer fits a stored amount.
  pub fn line_total(price: Decimal, qty: i32) -> Result<Decimal> {
    let total = price
      .checked_mul(Decimal::from(qty))
      .ok_or_else(|| too_large("line total"))?;
    bounded("line total", total)
  }

  pub fn is_consistent(&self) -> bool {
    let expected = self.subtotal + self.tax + self.shipping - self.discount;
    (self.total - expected).abs() <= Self::TOLERANCE
  }
}

fn too_large(what: &str) -> OrderflowError {
  OrderflowError::Validation(format!("{} exceeds {}", what, OrderTotals::MAX_AMOUNT))
}

fn bounded(what: &str, value: Decimal) -> Result<Decimal> {
  if value > OrderTotals::MAX_AMOUNT {
    return Err(too_large(what));
  }
  Ok(value)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
  pub id: Uuid,
  pub order_number: String,
  pub user_id: Uuid,
  pub status: OrderStatus,
  pub payment_status: PaymentStatus,
  pub fulfillment_status: FulfillmentStatus,
  pub payment_method: PaymentMethod,
  pub totals: OrderTotals,
  pub currency: String,
  pub shipping_address: AddressSnapshot,
  pub billing_address: AddressSnapshot,
  pub customer_note: Option<String>,
  /// Set while the order holds active stock reservations.
  pub has_active_reservation: bool,
  /// Set once reserved stock was converted into an on-hand deduction.
  pub stock_committed: bool,
  pub reservation_expires_at: Option<DateTime<Utc>>,
  pub payment_due_at: Option<DateTime<Utc>>,
  pub carrier: Option<String>,
  pub tracking_number: Option<String>,
  pub estimated_delivery: Option<DateTime<Utc>>,
  pub shipped_at: Option<DateTime<Utc>>,
  pub delivered_at: Option<DateTime<Utc>>,
  pub cancelled_at: Option<DateTime<Utc>>,
  pub cancellation_reason: Option<String>,
  pub version: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Order {
  pub fn is_paid(&self) -> bool {
    self.payment_status.is_settled()
  }

  /// Still pending and unpaid after its payment deadline.
  pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
    self.status == OrderStatus::Pending
      && !self.is_paid()
      && self.payment_due_at.is_some_and(|due| due <= now)
  }

  /// Moves the order along the transition table, returning the previous status.
  pub fn transition_to(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<OrderStatus> {
    if !self.status.can_transition_to(next) {
      return Err(OrderflowError::InvalidStateTransition {
        from: self.status,
        to: next,
      });
    }
    let previous = self.status;
    self.status = next;
    self.updated_at = now;
    Ok(previous)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
  pub id: Uuid,
  pub order_id: Uuid,
  pub product_id: Uuid,
  pub product_name: String,
  pub sku: String,
  pub unit_price: Decimal,
  pub quantity: i32,
  pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingInfo {
  pub carrier: String,
  pub tracking_number: String,
  pub estimated_delivery: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn d(v: i64, scale: u32) -> Decimal {
    Decimal::new(v, scale)
  }

  #[test]
  fn totals_add_up() {
    let totals = OrderTotals::compute(
      vec![(d(1999, 2), 2), (d(500, 2), 1)],
      d(8, 2),
      d(450, 2),
      d(300, 2),
    )
    .unwrap();
    assert_eq!(totals.subtotal, d(4498, 2));
    assert_eq!(totals.tax, d(360, 2));
    assert_eq!(totals.total, d(4498 + 360 + 450 - 300, 2));
    assert!(totals.is_consistent());
  }

  #[test]
  fn tax_is_rounded_to_cents() {
    let totals = OrderTotals::compute(vec![(d(333, 2), 1)], d(7, 2), Decimal::ZERO, Decimal::ZERO).unwrap();
    assert_eq!(totals.tax, d(23, 2));
    assert!(totals.is_consistent());
  }

  #[test]
  fn discount_larger_than_order_is_rejected() {
    let err = OrderTotals::compute(vec![(d(1000, 2), 1)], Decimal::ZERO, Decimal::ZERO, d(1001, 2)).unwrap_err();
    assert_eq!(err.code(), "validation_error");
  }

  #[test]
  fn max_amount_is_ten_digits_of_units() {
    assert_eq!(OrderTotals::MAX_AMOUNT, "9999999999.99".parse::<Decimal>().unwrap());
  }

  #[test]
  fn overflowing_amounts_are_rejected_not_panicking() {
    let err = OrderTotals::compute(vec![(d(1000, 2), 1)], Decimal::ZERO, Decimal::MAX, Decimal::ZERO).unwrap_err();
    assert_eq!(err.code(), "validation_error");

    let err = OrderTotals::compute(vec![(Decimal::MAX, i32::MAX)], Decimal::ZERO, Decimal::ZERO, Decimal::ZERO).unwrap_err();
    assert_eq!(err.code(), "validation_error");

    let err = OrderTotals::compute(vec![(OrderTotals::MAX_AMOUNT, 2)], Decimal::ZERO, Decimal::ZERO, Decimal::ZERO).unwrap_err();
    assert_eq!(err.code(), "validation_error");
  }

  #[test]
  fn drift_beyond_tolerance_is_detected() {
    let mut totals = OrderTotals::compute(vec![(d(1000, 2), 1)], Decimal::ZERO, Decimal::ZERO, Decimal::ZERO).unwrap();
    totals.total += d(2, 2);
    assert!(!totals.is_consistent());
  }
}
