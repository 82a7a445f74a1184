// orderflow/src/reconciler/webhook.rs

//! Webhook handling as a four-step pipeline:
//! verify signature, parse payload, dispatch by event type, acknowledge.
//!
//! Nothing is read or written before the signature check passed.

use super::gateway::{GatewayEvent, PaymentGateway};
use super::settle::Settlement;
use super::ReconcileOutcome;
use crate::error::{OrderflowError, Result};
use crate::model::Actor;
use crate::pipeline::{ContextData, Pipeline, PipelineControl};
use std::sync::Arc;
use tracing::info;

pub const WEBHOOK_STEPS: [&str; 4] = [
  "verify_webhook_signature",
  "parse_webhook_payload",
  "dispatch_webhook_event",
  "acknowledge_webhook_receipt",
];

pub struct WebhookCtx {
  pub provider: String,
  pub payload: Vec<u8>,
  pub signature: Option<String>,
  pub event: Option<GatewayEvent>,
  pub outcome: Option<ReconcileOutcome>,
}

impl WebhookCtx {
  pub fn new(provider: &str, payload: &[u8], signature: Option<&str>) -> Self {
    Self {
      provider: provider.to_string(),
      payload: payload.to_vec(),
      signature: signature.map(str::to_string),
      event: None,
      outcome: None,
    }
  }
}

type Ctx = ContextData<WebhookCtx>;

pub fn build_webhook_pipeline(
  gateway: Arc<dyn PaymentGateway>,
  settlement: Settlement,
) -> Pipeline<WebhookCtx, OrderflowError> {
  let mut pipeline = Pipeline::new(&[
    (WEBHOOK_STEPS[0], false, None),
    (WEBHOOK_STEPS[1], false, None),
    (WEBHOOK_STEPS[2], false, None),
    (WEBHOOK_STEPS[3], true, None),
  ]);

  let verifier = gateway.clone();
  pipeline.on_root("verify_webhook_signature", move |ctx| verify(ctx, verifier.clone()));
  pipeline.on_root("parse_webhook_payload", move |ctx| parse(ctx, gateway.clone()));
  pipeline.on_root("dispatch_webhook_event", move |ctx| dispatch(ctx, settlement.clone()));
  pipeline.on_root("acknowledge_webhook_receipt", acknowledge);
  pipeline
}

async fn verify(ctx: Ctx, gateway: Arc<dyn PaymentGateway>) -> Result<PipelineControl> {
  let c = ctx.read();
  gateway.verify_webhook(&c.payload, c.signature.as_deref())?;
  Ok(PipelineControl::Continue)
}

async fn parse(ctx: Ctx, gateway: Arc<dyn PaymentGateway>) -> Result<PipelineControl> {
  let event = gateway.parse_event(&ctx.read().payload)?;
  ctx.write().event = Some(event);
  Ok(PipelineControl::Continue)
}

async fn dispatch(ctx: Ctx, settlement: Settlement) -> Result<PipelineControl> {
  let (event, actor) = {
    let c = ctx.read();
    let event = c
      .event
      .clone()
      .ok_or_else(|| OrderflowError::Internal("webhook dispatched before parsing".to_string()))?;
    (event, Actor::Gateway(c.provider.clone()))
  };

  let outcome = match event {
    GatewayEvent::CheckoutSessionCompleted {
      session_id,
      payment_intent,
    } => settlement.apply_success(&session_id, payment_intent, &actor).await?,
    GatewayEvent::PaymentIntentSucceeded { payment_intent } => {
      settlement.apply_success(&payment_intent, Some(payment_intent.clone()), &actor).await?
    }
    GatewayEvent::PaymentIntentFailed { payment_intent, reason } => {
      settlement.apply_failure(&payment_intent, &reason, &actor).await?
    }
    GatewayEvent::ChargeRefunded {
      payment_intent,
      amount_refunded,
    } => settlement.apply_refund(&payment_intent, amount_refunded, &actor).await?,
    GatewayEvent::Unknown { event_type } => {
      info!(%event_type, "Unhandled webhook event type; acknowledging.");
      ReconcileOutcome::Ignored
    }
  };
  ctx.write().outcome = Some(outcome);
  Ok(PipelineControl::Continue)
}

async fn acknowledge(ctx: Ctx) -> Result<PipelineControl> {
  let c = ctx.read();
  info!(
    provider = %c.provider,
    event = c.event.as_ref().map(GatewayEvent::kind).unwrap_or("none"),
    outcome = ?c.outcome,
    "Webhook acknowledged."
  );
  Ok(PipelineControl::Continue)
}
