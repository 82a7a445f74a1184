// orderflow/src/model/request.rs

//! Inputs accepted from the (external) HTTP layer.

use super::status::{OrderStatus, PaymentStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct AddressInput {
  pub full_name: String,
  pub line1: String,
  #[serde(default)]
  pub line2: Option<String>,
  pub city: String,
  #[serde(default)]
  pub state: Option<String>,
  pub zip: String,
  pub country: String,
  pub phone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
  pub shipping_address: AddressInput,
  /// Defaults to the shipping address.
  #[serde(default)]
  pub billing_address: Option<AddressInput>,
  pub payment_method: String,
  #[serde(default)]
  pub tax_rate: Decimal,
  #[serde(default)]
  pub shipping_cost: Decimal,
  #[serde(default)]
  pub discount: Decimal,
  #[serde(default)]
  pub currency: Option<String>,
  #[serde(default)]
  pub customer_note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
  pub user_id: Option<Uuid>,
  pub status: Option<OrderStatus>,
  pub payment_status: Option<PaymentStatus>,
  pub created_from: Option<DateTime<Utc>>,
  pub created_to: Option<DateTime<Utc>>,
  pub limit: Option<u32>,
  pub offset: Option<u32>,
}

impl OrderFilter {
  pub const DEFAULT_LIMIT: u32 = 50;
  pub const MAX_LIMIT: u32 = 200;

  pub fn effective_limit(&self) -> u32 {
    self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT)
  }
}
