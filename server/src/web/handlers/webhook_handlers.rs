// orderflow_server/src/web/handlers/webhook_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::{info, instrument};

use crate::errors::AppError;
use crate::state::AppState;

/// Header carrying `t=<unix>,v1=<hex>`. The Stripe spelling is accepted too.
pub const SIGNATURE_HEADERS: [&str; 2] = ["Webhook-Signature", "Stripe-Signature"];

// --- Handler Implementation ---

/// Every successful outcome, no-ops included, is acknowledged with 200 so the provider
/// stops redelivering. Bad signatures get 400; transient failures get 5xx and are retried.
#[instrument(
    name = "handler::webhook",
    skip_all,
    fields(provider = %provider, payload_bytes = body.len())
)]
pub async fn webhook_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  provider: web::Path<String>,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  let signature = SIGNATURE_HEADERS
    .iter()
    .find_map(|name| req.headers().get(*name))
    .and_then(|value| value.to_str().ok());

  let outcome = app_state
    .reconciler
    .handle_webhook(&provider, &body, signature)
    .await?;
  info!(?outcome, "Webhook acknowledged.");
  Ok(HttpResponse::Ok().json(json!({ "received": true, "outcome": outcome })))
}
