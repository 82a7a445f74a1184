// orderflow_server/src/web/handlers/order_handlers.rs

use actix_web::{web, HttpResponse};
use orderflow::model::{CreateOrderRequest, OrderFilter, OrderStatus, ShippingInfo};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;
use crate::web::extractors::{AdminUser, AuthenticatedUser};

// --- Request DTOs ---

#[derive(Deserialize, Debug, Default)]
pub struct CancelOrderPayload {
  #[serde(default)]
  pub reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct StatusPayload {
  pub status: OrderStatus,
}

#[derive(Deserialize, Debug)]
pub struct NotePayload {
  pub note: String,
  #[serde(default = "default_public")]
  pub is_public: bool,
}

fn default_public() -> bool {
  true
}

#[derive(Deserialize, Debug, Default)]
pub struct EventsQuery {
  #[serde(default)]
  pub public_only: bool,
}

// --- Handlers ---

#[instrument(
  name = "handler::create_order",
  skip(app_state, auth_user, payload),
  fields(user_id = %auth_user.user_id, payment_method = %payload.payment_method)
)]
pub async fn create_order_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  payload: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, AppError> {
  let details = app_state
    .orchestrator
    .create_order(auth_user.user_id, payload.into_inner())
    .await?;
  info!(order_id = %details.order.id, order_number = %details.order.order_number, "Order created.");
  Ok(HttpResponse::Created().json(details))
}

#[instrument(name = "handler::list_orders", skip(app_state, auth_user, filter), fields(user_id = %auth_user.user_id))]
pub async fn list_orders_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  filter: web::Query<OrderFilter>,
) -> Result<HttpResponse, AppError> {
  let orders = app_state
    .orchestrator
    .list_orders(filter.into_inner(), &auth_user.actor())
    .await?;
  Ok(HttpResponse::Ok().json(json!({ "orders": orders, "count": orders.len() })))
}

#[instrument(name = "handler::get_order", skip(app_state, auth_user), fields(user_id = %auth_user.user_id))]
pub async fn get_order_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let details = app_state
    .orchestrator
    .get_order(order_id.into_inner(), &auth_user.actor())
    .await?;
  Ok(HttpResponse::Ok().json(details))
}

#[instrument(name = "handler::get_order_by_session", skip(app_state, auth_user), fields(user_id = %auth_user.user_id))]
pub async fn get_order_by_session_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  session_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  let details = app_state
    .orchestrator
    .get_by_session_id(&session_id, &auth_user.actor())
    .await?;
  Ok(HttpResponse::Ok().json(details))
}

#[instrument(name = "handler::cancel_order", skip(app_state, auth_user, payload), fields(user_id = %auth_user.user_id))]
pub async fn cancel_order_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<Uuid>,
  payload: Option<web::Json<CancelOrderPayload>>,
) -> Result<HttpResponse, AppError> {
  let reason = payload.and_then(|p| p.into_inner().reason);
  let order = app_state
    .orchestrator
    .cancel_order(order_id.into_inner(), &auth_user.actor(), reason)
    .await?;
  Ok(HttpResponse::Ok().json(order))
}

#[instrument(name = "handler::update_status", skip(app_state, admin, payload), fields(status = %payload.status))]
pub async fn update_status_handler(
  app_state: web::Data<AppState>,
  admin: AdminUser,
  order_id: web::Path<Uuid>,
  payload: web::Json<StatusPayload>,
) -> Result<HttpResponse, AppError> {
  let order = app_state
    .orchestrator
    .update_status(order_id.into_inner(), payload.status, &admin.actor())
    .await?;
  Ok(HttpResponse::Ok().json(order))
}

#[instrument(name = "handler::update_shipping", skip(app_state, admin, payload), fields(carrier = %payload.carrier))]
pub async fn update_shipping_handler(
  app_state: web::Data<AppState>,
  admin: AdminUser,
  order_id: web::Path<Uuid>,
  payload: web::Json<ShippingInfo>,
) -> Result<HttpResponse, AppError> {
  let order = app_state
    .orchestrator
    .update_shipping_info(order_id.into_inner(), payload.into_inner(), &admin.actor())
    .await?;
  Ok(HttpResponse::Ok().json(order))
}

#[instrument(name = "handler::update_delivery", skip(app_state, admin, payload), fields(status = %payload.status))]
pub async fn update_delivery_handler(
  app_state: web::Data<AppState>,
  admin: AdminUser,
  order_id: web::Path<Uuid>,
  payload: web::Json<StatusPayload>,
) -> Result<HttpResponse, AppError> {
  let order = app_state
    .orchestrator
    .update_delivery_status(order_id.into_inner(), payload.status, &admin.actor())
    .await?;
  Ok(HttpResponse::Ok().json(order))
}

#[instrument(name = "handler::add_note", skip(app_state, auth_user, payload), fields(user_id = %auth_user.user_id))]
pub async fn add_note_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<Uuid>,
  payload: web::Json<NotePayload>,
) -> Result<HttpResponse, AppError> {
  // Customers cannot write notes they would not be able to read back.
  let is_public = payload.is_public || !auth_user.is_admin();
  let event = app_state
    .orchestrator
    .add_note(order_id.into_inner(), &payload.note, &auth_user.actor(), is_public)
    .await?;
  Ok(HttpResponse::Created().json(event))
}

#[instrument(name = "handler::get_events", skip(app_state, auth_user, query), fields(user_id = %auth_user.user_id))]
pub async fn get_events_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<Uuid>,
  query: web::Query<EventsQuery>,
) -> Result<HttpResponse, AppError> {
  let events = app_state
    .orchestrator
    .get_events(order_id.into_inner(), &auth_user.actor(), query.public_only)
    .await?;
  Ok(HttpResponse::Ok().json(json!({ "events": events })))
}

#[instrument(name = "handler::create_checkout_session", skip(app_state, auth_user), fields(user_id = %auth_user.user_id))]
pub async fn create_checkout_session_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  order_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let session = app_state
    .orchestrator
    .create_checkout_session(order_id.into_inner(), auth_user.user_id)
    .await?;
  info!(session_id = %session.id, "Checkout session ready.");
  Ok(HttpResponse::Created().json(session))
}
