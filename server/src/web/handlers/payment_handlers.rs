// orderflow_server/src/web/handlers/payment_handlers.rs

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;
use crate::web::extractors::AuthenticatedUser;

#[derive(Deserialize, Debug)]
pub struct ConfirmPaymentPayload {
  pub order_id: Uuid,
  pub session_id: String,
}

/// Client-side fallback for when the customer is back from checkout before the webhook.
#[instrument(
  name = "handler::confirm_payment",
  skip(app_state, auth_user, payload),
  fields(user_id = %auth_user.user_id, order_id = %payload.order_id, session_id = %payload.session_id)
)]
pub async fn confirm_payment_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  payload: web::Json<ConfirmPaymentPayload>,
) -> Result<HttpResponse, AppError> {
  let outcome = app_state
    .reconciler
    .confirm_payment_success(payload.order_id, auth_user.user_id, &payload.session_id)
    .await?;
  info!(?outcome, "Payment confirmation handled.");
  Ok(HttpResponse::Ok().json(json!({ "order_id": payload.order_id, "outcome": outcome })))
}
