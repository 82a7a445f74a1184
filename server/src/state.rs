// orderflow_server/src/state.rs
use crate::config::AppConfig;
use orderflow::{OrderOrchestrator, PaymentReconciler};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub db_pool: PgPool,
  pub orchestrator: OrderOrchestrator,
  pub reconciler: PaymentReconciler,
  pub config: Arc<AppConfig>,
}
