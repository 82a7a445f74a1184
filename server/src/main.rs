// orderflow_server/src/main.rs

mod config;
mod db;
mod errors;
mod services;
mod state;
mod web;

use crate::config::AppConfig;
use crate::db::{PgEventStore, PgStore};
use crate::services::{EmailNotifier, MockPaymentGateway};
use crate::state::AppState;

use actix_web::{web as actix_data, App, HttpServer};
use orderflow::{Engine, NotificationDispatcher, NotificationWorker};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

fn init_tracing() {
  let builder = tracing_subscriber::fmt()
    .with_max_level(Level::INFO)
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()) // RUST_LOG override
    .with_span_events(FmtSpan::CLOSE); // Log when spans close, showing duration
  if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
    builder.json().init();
  } else {
    builder.init();
  }
}

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
  tracing::error!(error = %err, "{}", context);
  std::io::Error::other(format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  init_tracing();
  tracing::info!("Starting orderflow server...");

  let app_config = Arc::new(AppConfig::from_env().map_err(|e| startup_error("Failed to load application configuration", e))?);

  let db_pool = PgPoolOptions::new()
    .max_connections(20)
    .acquire_timeout(Duration::from_secs(5))
    .connect(&app_config.database_url)
    .await
    .map_err(|e| startup_error("Failed to connect to the database", e))?;
  tracing::info!("Successfully connected to the database.");

  let store = PgStore::new(db_pool.clone());
  if app_config.run_migrations {
    store
      .migrate()
      .await
      .map_err(|e| startup_error("Failed to run database migrations", e))?;
    tracing::info!("Database migrations applied.");
  }

  let gateway = MockPaymentGateway::new(
    &app_config.payment_provider,
    &app_config.webhook_secret,
    app_config.engine.webhook_tolerance_secs,
    &app_config.app_base_url,
  );
  let (dispatcher, receiver) = NotificationDispatcher::channel(app_config.engine.notification_queue_capacity);
  let notifier = Arc::new(EmailNotifier::new(&app_config.mock_email_sender));
  let notification_worker = NotificationWorker::new(receiver, notifier, &app_config.engine).spawn();

  let engine = Engine::new(
    Arc::new(store),
    Arc::new(PgEventStore::new(db_pool.clone())),
    Arc::new(gateway),
    dispatcher,
    app_config.engine.clone(),
  );

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let sweeper = engine.sweeper().spawn(shutdown_rx);

  let app_state = AppState {
    db_pool: db_pool.clone(),
    orchestrator: engine.orchestrator(),
    reconciler: engine.reconciler(),
    config: app_config.clone(),
  };
  // Only the app state keeps dispatchers alive from here on.
  drop(engine);

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  tracing::info!("Attempting to bind server to {}...", server_address);

  let served = HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(web::configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await;

  tracing::info!("HTTP server stopped; shutting down background workers.");
  let _ = shutdown_tx.send(true);
  if let Err(e) = sweeper.await {
    tracing::warn!(error = %e, "Reservation sweeper ended abnormally.");
  }
  // The worker drains whatever is still queued once the last dispatcher is gone.
  if tokio::time::timeout(Duration::from_secs(10), notification_worker).await.is_err() {
    tracing::warn!("Notification worker did not drain in time; pending notifications dropped.");
  }
  db_pool.close().await;
  served
}
