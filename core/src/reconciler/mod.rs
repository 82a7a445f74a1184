// orderflow/src/reconciler/mod.rs

//! Payment Reconciler: applies asynchronous, possibly duplicated gateway notifications
//! to payments and orders.
//!
//! Deliveries are at-least-once and may arrive out of order or race the customer's
//! fallback confirmation. The payment's gateway reference is the idempotency key: a
//! notification for a payment that already reached the target state is a no-op success.

pub mod gateway;
pub mod settle;
pub mod signature;
pub mod webhook;

use crate::engine::Engine;
use crate::error::{OrderflowError, Result};
use crate::model::Actor;
use crate::pipeline::{ContextData, Pipeline, PipelineResult};
use crate::store::PaymentRepository;
use serde::Serialize;
use settle::Settlement;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use webhook::{build_webhook_pipeline, WebhookCtx};

pub use gateway::{parse_gateway_event, CheckoutSession, GatewayEvent, PaymentGateway, SessionState};
pub use signature::{sign_payload, verify_signature};

/// Result of one reconciliation attempt. Every variant is a success from the caller's
/// point of view and should be acknowledged with a 2xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
  /// State changed.
  Applied,
  /// The payment was already in the target state (replay, or the other path won).
  AlreadyProcessed,
  /// Nothing to do for this notification.
  Ignored,
  /// The gateway has not captured the payment yet.
  AwaitingPayment,
}

#[derive(Clone)]
pub struct PaymentReconciler {
  engine: Engine,
  settlement: Settlement,
  webhook_pipeline: Arc<Pipeline<WebhookCtx, OrderflowError>>,
}

impl PaymentReconciler {
  pub fn new(engine: Engine) -> Self {
    let settlement = Settlement::new(engine.clone());
    let webhook_pipeline = build_webhook_pipeline(engine.gateway.clone(), settlement.clone());
    Self {
      engine,
      settlement,
      webhook_pipeline: Arc::new(webhook_pipeline),
    }
  }

  /// Verifies, parses and applies one gateway notification.
  ///
  /// Errors: `InvalidSignature` for unsigned/tampered payloads (do not retry),
  /// `PaymentNotFound` when the referenced payment is not known yet (retry later).
  #[instrument(name = "PaymentReconciler::handle_webhook", skip_all, fields(%provider, bytes = payload.len()), err(Display))]
  pub async fn handle_webhook(&self, provider: &str, payload: &[u8], signature: Option<&str>) -> Result<ReconcileOutcome> {
    if provider != self.engine.gateway.provider() {
      return Err(OrderflowError::Validation(format!("unknown payment provider '{}'", provider)));
    }
    let ctx = ContextData::new(WebhookCtx::new(provider, payload, signature));
    match self.webhook_pipeline.run(ctx.clone()).await? {
      PipelineResult::Completed => Ok(ctx.read().outcome.unwrap_or(ReconcileOutcome::Ignored)),
      PipelineResult::Stopped => Ok(ReconcileOutcome::Ignored),
    }
  }

  /// Fallback for clients returning from the hosted checkout page before the webhook
  /// arrived. Converges on the same state as the webhook; whichever is first wins.
  #[instrument(name = "PaymentReconciler::confirm_payment_success", skip_all, fields(%order_id, %user_id, %session_id), err(Display))]
  pub async fn confirm_payment_success(&self, order_id: Uuid, user_id: Uuid, session_id: &str) -> Result<ReconcileOutcome> {
    let payment = {
      let mut tx = self.engine.store.begin().await?;
      let payment = tx.find_payment_by_reference(session_id).await;
      tx.rollback().await?;
      payment?.ok_or_else(|| OrderflowError::PaymentNotFound(session_id.to_string()))?
    };
    if payment.order_id != order_id || payment.user_id != user_id {
      return Err(OrderflowError::PaymentMismatch(format!(
        "session {} does not belong to order {} of this user",
        session_id, order_id
      )));
    }
    if payment.is_paid() {
      return Ok(ReconcileOutcome::AlreadyProcessed);
    }

    let state = self.engine.gateway.retrieve_session(session_id).await?;
    if !state.paid {
      info!("Gateway has not captured the payment yet.");
      return Ok(ReconcileOutcome::AwaitingPayment);
    }
    self
      .settlement
      .apply_success(session_id, state.transaction_id, &Actor::Customer(user_id))
      .await
  }
}
