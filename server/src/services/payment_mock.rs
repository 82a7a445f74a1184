// orderflow_server/src/services/payment_mock.rs

//! In-process stand-in for a hosted-checkout payment provider.
//!
//! Sessions live in memory. A session reports itself paid when retrieved, except for
//! amounts whose cents end in `123` (mod 1000), which always fail.

use async_trait::async_trait;
use chrono::Utc;
use orderflow::model::{Order, OrderItem};
use orderflow::reconciler::verify_signature;
use orderflow::{CheckoutSession, OrderflowError, PaymentGateway, Result, SessionState};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MockCheckoutSession {
  pub id: String,
  pub payment_intent: String,
  pub order_id: Uuid,
  pub amount_minor: i64,
  pub currency: String,
  pub status: String, // "open", "complete", "failed"
}

pub struct MockPaymentGateway {
  provider: String,
  webhook_secret: String,
  tolerance_secs: i64,
  base_url: String,
  latency: std::time::Duration,
  sessions: Mutex<HashMap<String, MockCheckoutSession>>,
}

impl MockPaymentGateway {
  pub fn new(provider: &str, webhook_secret: &str, tolerance_secs: i64, base_url: &str) -> Self {
    Self {
      provider: provider.to_string(),
      webhook_secret: webhook_secret.to_string(),
      tolerance_secs,
      base_url: base_url.trim_end_matches('/').to_string(),
      latency: std::time::Duration::from_millis(50),
      sessions: Mutex::new(HashMap::new()),
    }
  }

  pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
    self.latency = latency;
    self
  }
}

fn to_minor_units(amount: Decimal) -> Result<i64> {
  (amount * Decimal::ONE_HUNDRED)
    .round()
    .to_i64()
    .ok_or_else(|| OrderflowError::Gateway(format!("amount {} cannot be charged", amount)))
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
  fn provider(&self) -> &str {
    &self.provider
  }

  fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> Result<()> {
    let header = signature.ok_or_else(|| OrderflowError::InvalidSignature("missing signature header".to_string()))?;
    verify_signature(payload, header, &self.webhook_secret, self.tolerance_secs, Utc::now())
  }

  #[instrument(skip(self, order, _items), fields(order_id = %order.id, amount = %order.totals.total, currency = %order.currency))]
  async fn create_checkout_session(&self, order: &Order, _items: &[OrderItem]) -> Result<CheckoutSession> {
    let amount_minor = to_minor_units(order.totals.total)?;
    if amount_minor <= 0 {
      return Err(OrderflowError::Gateway("Amount must be greater than zero".to_string()));
    }
    tokio::time::sleep(self.latency).await; // Simulate network latency

    let session = MockCheckoutSession {
      id: format!("mock_cs_{}", Uuid::new_v4().simple()),
      payment_intent: format!("mock_pi_{}", Uuid::new_v4().simple()),
      order_id: order.id,
      amount_minor,
      currency: order.currency.clone(),
      status: "open".to_string(),
    };
    info!(session_id = %session.id, "Simulated checkout session created.");
    let checkout = CheckoutSession {
      id: session.id.clone(),
      url: Some(format!("{}/mock-checkout/{}", self.base_url, session.id)),
      transaction_id: Some(session.payment_intent.clone()),
    };
    self.sessions.lock().await.insert(session.id.clone(), session);
    Ok(checkout)
  }

  #[instrument(skip(self))]
  async fn retrieve_session(&self, session_id: &str) -> Result<SessionState> {
    tokio::time::sleep(self.latency).await;
    let mut sessions = self.sessions.lock().await;
    let session = sessions
      .get_mut(session_id)
      .ok_or_else(|| OrderflowError::Gateway(format!("unknown checkout session {}", session_id)))?;

    if session.status == "open" {
      // Arbitrary failure condition
      session.status = if session.amount_minor % 1000 == 123 {
        "failed".to_string()
      } else {
        "complete".to_string()
      };
      info!(session_id, status = %session.status, "Simulated checkout session settled.");
    }
    Ok(SessionState {
      paid: session.status == "complete",
      transaction_id: Some(session.payment_intent.clone()),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use orderflow::model::{
    AddressSnapshot, FulfillmentStatus, OrderStatus, OrderTotals, PaymentMethod, PaymentStatus,
  };
  use orderflow::reconciler::sign_payload;

  fn order(total_cents: i64) -> Order {
    let now = Utc::now();
    let address = AddressSnapshot {
      full_name: "Ada Lovelace".into(),
      line1: "12 Analytical Row".into(),
      line2: None,
      city: "London".into(),
      state: None,
      zip: "N1 7AA".into(),
      country: "GB".into(),
      phone: "+442079460000".into(),
    };
    let total = Decimal::new(total_cents, 2);
    Order {
      id: Uuid::new_v4(),
      order_number: "ORD-TEST".into(),
      user_id: Uuid::new_v4(),
      status: OrderStatus::Pending,
      payment_status: PaymentStatus::Pending,
      fulfillment_status: FulfillmentStatus::Unfulfilled,
      payment_method: PaymentMethod::Card,
      totals: OrderTotals {
        subtotal: total,
        tax: Decimal::ZERO,
        shipping: Decimal::ZERO,
        discount: Decimal::ZERO,
        total,
      },
      currency: "GBP".into(),
      shipping_address: address.clone(),
      billing_address: address,
      customer_note: None,
      has_active_reservation: true,
      stock_committed: false,
      reservation_expires_at: None,
      payment_due_at: None,
      carrier: None,
      tracking_number: None,
      estimated_delivery: None,
      shipped_at: None,
      delivered_at: None,
      cancelled_at: None,
      cancellation_reason: None,
      version: 1,
      created_at: now,
      updated_at: now,
    }
  }

  fn gateway() -> MockPaymentGateway {
    MockPaymentGateway::new("mockpay", "whsec_mock", 300, "http://localhost:8080/")
      .with_latency(std::time::Duration::ZERO)
  }

  #[tokio::test]
  async fn sessions_settle_on_retrieval() {
    let gateway = gateway();
    let session = gateway.create_checkout_session(&order(4999), &[]).await.unwrap();
    assert!(session.url.as_deref().unwrap().starts_with("http://localhost:8080/mock-checkout/"));
    let state = gateway.retrieve_session(&session.id).await.unwrap();
    assert!(state.paid);
    assert_eq!(state.transaction_id, session.transaction_id);
  }

  #[tokio::test]
  async fn trigger_amount_fails_and_unknown_session_errors() {
    let gateway = gateway();
    let session = gateway.create_checkout_session(&order(1123), &[]).await.unwrap();
    assert!(!gateway.retrieve_session(&session.id).await.unwrap().paid);
    let err = gateway.retrieve_session("mock_cs_missing").await.unwrap_err();
    assert_eq!(err.code(), "gateway_error");
  }

  #[test]
  fn webhook_signatures_are_checked() {
    let gateway = gateway();
    let payload = br#"{"type":"checkout.session.completed"}"#;
    let header = sign_payload("whsec_mock", Utc::now().timestamp(), payload).unwrap();
    assert!(gateway.verify_webhook(payload, Some(&header)).is_ok());
    assert_eq!(gateway.verify_webhook(payload, None).unwrap_err().code(), "invalid_signature");
    let forged = sign_payload("whsec_other", Utc::now().timestamp(), payload).unwrap();
    assert!(gateway.verify_webhook(payload, Some(&forged)).is_err());
  }
}
