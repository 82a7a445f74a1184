// orderflow_server/src/db/rows.rs

//! Row shapes as they come out of PostgreSQL, and their conversion into engine records.
//! Enums are stored as their text form; addresses as JSONB.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use orderflow::model::{
  AddressSnapshot, Order, OrderEvent, OrderItem, OrderTotals, Payment, StockReservation,
};
use orderflow::{OrderflowError, Result};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

fn column<T>(name: &str, raw: &str) -> Result<T>
where
  T: FromStr<Err = OrderflowError>,
{
  raw
    .parse()
    .map_err(|e| OrderflowError::storage(anyhow!("column '{}' holds an unreadable value: {}", name, e)))
}

pub const ORDER_COLUMNS: &str = "id, order_number, user_id, status, payment_status, fulfillment_status, \
  payment_method, subtotal, tax, shipping, discount, total, currency, shipping_address, billing_address, \
  customer_note, has_active_reservation, stock_committed, reservation_expires_at, payment_due_at, carrier, \
  tracking_number, estimated_delivery, shipped_at, delivered_at, cancelled_at, cancellation_reason, version, \
  created_at, updated_at";

#[derive(Debug, FromRow)]
pub struct OrderRow {
  id: Uuid,
  order_number: String,
  user_id: Uuid,
  status: String,
  payment_status: String,
  fulfillment_status: String,
  payment_method: String,
  subtotal: Decimal,
  tax: Decimal,
  shipping: Decimal,
  discount: Decimal,
  total: Decimal,
  currency: String,
  shipping_address: Json<AddressSnapshot>,
  billing_address: Json<AddressSnapshot>,
  customer_note: Option<String>,
  has_active_reservation: bool,
  stock_committed: bool,
  reservation_expires_at: Option<DateTime<Utc>>,
  payment_due_at: Option<DateTime<Utc>>,
  carrier: Option<String>,
  tracking_number: Option<String>,
  estimated_delivery: Option<DateTime<Utc>>,
  shipped_at: Option<DateTime<Utc>>,
  delivered_at: Option<DateTime<Utc>>,
  cancelled_at: Option<DateTime<Utc>>,
  cancellation_reason: Option<String>,
  version: i64,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
  type Error = OrderflowError;

  fn try_from(row: OrderRow) -> Result<Self> {
    Ok(Order {
      id: row.id,
      order_number: row.order_number,
      user_id: row.user_id,
      status: column("status", &row.status)?,
      payment_status: column("payment_status", &row.payment_status)?,
      fulfillment_status: column("fulfillment_status", &row.fulfillment_status)?,
      payment_method: column("payment_method", &row.payment_method)?,
      totals: OrderTotals {
        subtotal: row.subtotal,
        tax: row.tax,
        shipping: row.shipping,
        discount: row.discount,
        total: row.total,
      },
      currency: row.currency,
      shipping_address: row.shipping_address.0,
      billing_address: row.billing_address.0,
      customer_note: row.customer_note,
      has_active_reservation: row.has_active_reservation,
      stock_committed: row.stock_committed,
      reservation_expires_at: row.reservation_expires_at,
      payment_due_at: row.payment_due_at,
      carrier: row.carrier,
      tracking_number: row.tracking_number,
      estimated_delivery: row.estimated_delivery,
      shipped_at: row.shipped_at,
      delivered_at: row.delivered_at,
      cancelled_at: row.cancelled_at,
      cancellation_reason: row.cancellation_reason,
      version: row.version,
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

#[derive(Debug, FromRow)]
pub struct OrderItemRow {
  id: Uuid,
  order_id: Uuid,
  product_id: Uuid,
  product_name: String,
  sku: String,
  unit_price: Decimal,
  quantity: i32,
  line_total: Decimal,
}

impl From<OrderItemRow> for OrderItem {
  fn from(row: OrderItemRow) -> Self {
    OrderItem {
      id: row.id,
      order_id: row.order_id,
      product_id: row.product_id,
      product_name: row.product_name,
      sku: row.sku,
      unit_price: row.unit_price,
      quantity: row.quantity,
      line_total: row.line_total,
    }
  }
}

pub const PAYMENT_COLUMNS: &str = "id, order_id, user_id, provider, method, status, amount, currency, \
  external_id, transaction_id, checkout_url, failure_reason, refund_amount, processed_at, created_at, updated_at";

#[derive(Debug, FromRow)]
pub struct PaymentRow {
  id: Uuid,
  order_id: Uuid,
  user_id: Uuid,
  provider: String,
  method: String,
  status: String,
  amount: Decimal,
  currency: String,
  external_id: Option<String>,
  transaction_id: Option<String>,
  checkout_url: Option<String>,
  failure_reason: Option<String>,
  refund_amount: Decimal,
  processed_at: Option<DateTime<Utc>>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
  type Error = OrderflowError;

  fn try_from(row: PaymentRow) -> Result<Self> {
    Ok(Payment {
      id: row.id,
      order_id: row.order_id,
      user_id: row.user_id,
      provider: row.provider,
      method: column("method", &row.method)?,
      status: column("status", &row.status)?,
      amount: row.amount,
      currency: row.currency,
      external_id: row.external_id,
      transaction_id: row.transaction_id,
      checkout_url: row.checkout_url,
      failure_reason: row.failure_reason,
      refund_amount: row.refund_amount,
      processed_at: row.processed_at,
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

pub const RESERVATION_COLUMNS: &str =
  "id, order_id, product_id, quantity, status, expires_at, created_at, terminated_at";

#[derive(Debug, FromRow)]
pub struct ReservationRow {
  id: Uuid,
  order_id: Uuid,
  product_id: Uuid,
  quantity: i32,
  status: String,
  expires_at: DateTime<Utc>,
  created_at: DateTime<Utc>,
  terminated_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReservationRow> for StockReservation {
  type Error = OrderflowError;

  fn try_from(row: ReservationRow) -> Result<Self> {
    Ok(StockReservation {
      id: row.id,
      order_id: row.order_id,
      product_id: row.product_id,
      quantity: row.quantity,
      status: column("status", &row.status)?,
      expires_at: row.expires_at,
      created_at: row.created_at,
      terminated_at: row.terminated_at,
    })
  }
}

#[derive(Debug, FromRow)]
pub struct EventRow {
  id: Uuid,
  sequence: i64,
  order_id: Uuid,
  event_type: String,
  payload: JsonValue,
  actor: String,
  is_public: bool,
  created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for OrderEvent {
  type Error = OrderflowError;

  fn try_from(row: EventRow) -> Result<Self> {
    Ok(OrderEvent {
      id: row.id,
      sequence: row.sequence,
      order_id: row.order_id,
      event_type: column("event_type", &row.event_type)?,
      payload: row.payload,
      actor: column("actor", &row.actor)?,
      is_public: row.is_public,
      created_at: row.created_at,
    })
  }
}

/// Collects rows into records, failing on the first unreadable one.
pub fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
  T: TryFrom<R, Error = OrderflowError>,
{
  rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use orderflow::model::{Actor, OrderEventType, ReservationStatus};

  #[test]
  fn text_columns_parse_into_enums() {
    let row = ReservationRow {
      id: Uuid::new_v4(),
      order_id: Uuid::new_v4(),
      product_id: Uuid::new_v4(),
      quantity: 2,
      status: "expired".to_string(),
      expires_at: Utc::now(),
      created_at: Utc::now(),
      terminated_at: Some(Utc::now()),
    };
    let reservation = StockReservation::try_from(row).unwrap();
    assert_eq!(reservation.status, ReservationStatus::Expired);
  }

  #[test]
  fn unreadable_column_is_a_storage_error() {
    let row = EventRow {
      id: Uuid::new_v4(),
      sequence: 1,
      order_id: Uuid::new_v4(),
      event_type: "order_teleported".to_string(),
      payload: JsonValue::Null,
      actor: "system".to_string(),
      is_public: true,
      created_at: Utc::now(),
    };
    let err = OrderEvent::try_from(row).unwrap_err();
    assert_eq!(err.code(), "storage_error");
  }

  #[test]
  fn actor_column_round_trips() {
    let user = Uuid::new_v4();
    let row = EventRow {
      id: Uuid::new_v4(),
      sequence: 7,
      order_id: Uuid::new_v4(),
      event_type: OrderEventType::NoteAdded.as_str().to_string(),
      payload: serde_json::json!({"note": "leave at door"}),
      actor: Actor::Customer(user).to_string(),
      is_public: true,
      created_at: Utc::now(),
    };
    let event = OrderEvent::try_from(row).unwrap();
    assert_eq!(event.actor, Actor::Customer(user));
    assert_eq!(event.event_type, OrderEventType::NoteAdded);
  }
}
