// orderflow/src/reconciler/gateway.rs

//! The abstract payment-gateway contract the reconciler depends on.

use crate::error::{OrderflowError, Result};
use crate::model::{Order, OrderItem};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A hosted checkout session created for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
  pub id: String,
  pub url: Option<String>,
  /// Payment-intent id, when the gateway assigns it up front.
  pub transaction_id: Option<String>,
}

/// What the gateway currently says about a session (used by the fallback path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
  pub paid: bool,
  pub transaction_id: Option<String>,
}

/// Gateway notifications the reconciler understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
  CheckoutSessionCompleted {
    session_id: String,
    payment_intent: Option<String>,
  },
  PaymentIntentSucceeded {
    payment_intent: String,
  },
  PaymentIntentFailed {
    payment_intent: String,
    reason: String,
  },
  /// `amount_refunded` is cumulative for the charge.
  ChargeRefunded {
    payment_intent: String,
    amount_refunded: Decimal,
  },
  Unknown {
    event_type: String,
  },
}

impl GatewayEvent {
  pub fn kind(&self) -> &str {
    match self {
      GatewayEvent::CheckoutSessionCompleted { .. } => "checkout_session_completed",
      GatewayEvent::PaymentIntentSucceeded { .. } => "payment_intent_succeeded",
      GatewayEvent::PaymentIntentFailed { .. } => "payment_intent_failed",
      GatewayEvent::ChargeRefunded { .. } => "charge_refunded",
      GatewayEvent::Unknown { event_type } => event_type,
    }
  }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
  /// Provider name used in webhook routes and stored on payments.
  fn provider(&self) -> &str;

  /// Rejects unsigned or tampered payloads. Must not have side effects.
  fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> Result<()>;

  fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent> {
    parse_gateway_event(payload)
  }

  async fn create_checkout_session(&self, order: &Order, items: &[OrderItem]) -> Result<CheckoutSession>;

  async fn retrieve_session(&self, session_id: &str) -> Result<SessionState>;
}

fn str_field<'a>(object: &'a JsonValue, key: &str) -> Option<&'a str> {
  object.get(key).and_then(JsonValue::as_str)
}

fn required_str(object: &JsonValue, key: &str, event_type: &str) -> Result<String> {
  str_field(object, key)
    .map(str::to_string)
    .ok_or_else(|| OrderflowError::Validation(format!("'{}' event is missing data.object.{}", event_type, key)))
}

/// Parses a Stripe-shaped event envelope: `{"type": ..., "data": {"object": {...}}}`.
/// Both dotted (`checkout.session.completed`) and underscored type names are accepted.
/// Amounts are in minor units.
pub fn parse_gateway_event(payload: &[u8]) -> Result<GatewayEvent> {
  let envelope: JsonValue = serde_json::from_slice(payload)
    .map_err(|e| OrderflowError::Validation(format!("webhook payload is not valid JSON: {}", e)))?;
  let event_type = str_field(&envelope, "type")
    .ok_or_else(|| OrderflowError::Validation("webhook payload has no 'type'".to_string()))?
    .to_string();
  let object = envelope
    .get("data")
    .and_then(|d| d.get("object"))
    .cloned()
    .unwrap_or(JsonValue::Null);

  let event = match event_type.replace('.', "_").as_str() {
    "checkout_session_completed" => GatewayEvent::CheckoutSessionCompleted {
      session_id: required_str(&object, "id", &event_type)?,
      payment_intent: str_field(&object, "payment_intent").map(str::to_string),
    },
    "payment_intent_succeeded" => GatewayEvent::PaymentIntentSucceeded {
      payment_intent: required_str(&object, "id", &event_type)?,
    },
    "payment_intent_failed" | "payment_intent_payment_failed" => GatewayEvent::PaymentIntentFailed {
      payment_intent: required_str(&object, "id", &event_type)?,
      reason: object
        .get("last_payment_error")
        .and_then(|e| str_field(e, "message"))
        .or_else(|| str_field(&object, "failure_message"))
        .unwrap_or("payment failed")
        .to_string(),
    },
    "charge_refunded" => {
      let minor = object.get("amount_refunded").and_then(JsonValue::as_i64).ok_or_else(|| {
        OrderflowError::Validation(format!("'{}' event is missing data.object.amount_refunded", event_type))
      })?;
      GatewayEvent::ChargeRefunded {
        payment_intent: required_str(&object, "payment_intent", &event_type)?,
        amount_refunded: Decimal::new(minor, 2),
      }
    }
    _ => GatewayEvent::Unknown { event_type },
  };
  Ok(event)
}
