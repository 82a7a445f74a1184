// orderflow_server/src/web/routes.rs

use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;
use crate::web::handlers::{order_handlers, payment_handlers, webhook_handlers};

async fn health_check_handler(app_state: web::Data<AppState>) -> HttpResponse {
  match sqlx::query("SELECT 1").execute(&app_state.db_pool).await {
    Ok(_) => HttpResponse::Ok().json(json!({ "status": "ok", "payment_provider": app_state.config.payment_provider })),
    Err(e) => {
      warn!(error = %e, "Health check could not reach the database.");
      HttpResponse::ServiceUnavailable().json(json!({ "status": "degraded", "database": "unreachable" }))
    }
  }
}

// Called in `main.rs` to configure services for the Actix App.
pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/orders")
          .route("", web::post().to(order_handlers::create_order_handler))
          .route("", web::get().to(order_handlers::list_orders_handler))
          .route(
            "/by-session/{session_id}",
            web::get().to(order_handlers::get_order_by_session_handler),
          )
          .route("/{order_id}", web::get().to(order_handlers::get_order_handler))
          .route("/{order_id}/cancel", web::post().to(order_handlers::cancel_order_handler))
          .route("/{order_id}/status", web::put().to(order_handlers::update_status_handler))
          .route("/{order_id}/shipping", web::put().to(order_handlers::update_shipping_handler))
          .route("/{order_id}/delivery", web::put().to(order_handlers::update_delivery_handler))
          .route("/{order_id}/notes", web::post().to(order_handlers::add_note_handler))
          .route("/{order_id}/events", web::get().to(order_handlers::get_events_handler))
          .route(
            "/{order_id}/checkout-session",
            web::post().to(order_handlers::create_checkout_session_handler),
          ),
      )
      .service(web::scope("/payments").route("/confirm", web::post().to(payment_handlers::confirm_payment_handler)))
      // The {provider} segment must name the configured gateway.
      .service(web::scope("/webhooks").route("/{provider}", web::post().to(webhook_handlers::webhook_handler))),
  );
}
