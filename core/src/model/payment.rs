// orderflow/src/model/payment.rs

use super::status::PaymentStatus;
use super::text_enum;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The accepted payment methods. Anything else is rejected at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
  Card,
  Wallet,
  CashOnDelivery,
}

text_enum!(PaymentMethod {
  Card => "card",
  Wallet => "wallet",
  CashOnDelivery => "cash_on_delivery",
});

impl PaymentMethod {
  /// Settled through a gateway checkout session and confirmed by webhook.
  pub fn is_online(&self) -> bool {
    !matches!(self, PaymentMethod::CashOnDelivery)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
  pub id: Uuid,
  pub order_id: Uuid,
  pub user_id: Uuid,
  pub provider: String,
  pub method: PaymentMethod,
  pub status: PaymentStatus,
  pub amount: Decimal,
  pub currency: String,
  /// Gateway checkout-session id. Unique; the idempotency key for webhook replays.
  pub external_id: Option<String>,
  /// Gateway transaction (payment intent) id. Unique once known.
  pub transaction_id: Option<String>,
  /// Hosted checkout page handed to the customer, if the gateway issued one.
  pub checkout_url: Option<String>,
  pub failure_reason: Option<String>,
  pub refund_amount: Decimal,
  pub processed_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Payment {
  pub fn is_paid(&self) -> bool {
    self.status.is_settled()
  }

  pub fn matches_reference(&self, reference: &str) -> bool {
    self.external_id.as_deref() == Some(reference) || self.transaction_id.as_deref() == Some(reference)
  }
}
