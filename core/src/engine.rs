// orderflow/src/engine.rs

//! Explicit wiring of the engine's collaborators. There is no global state: everything a
//! component needs is handed to it through [`Engine`].

use crate::config::OrderflowConfig;
use crate::events::OrderEventLog;
use crate::notify::NotificationDispatcher;
use crate::orchestrator::numbers::{OrderNumberGenerator, RandomOrderNumbers};
use crate::orchestrator::OrderOrchestrator;
use crate::reconciler::{PaymentGateway, PaymentReconciler};
use crate::reservation::{StockReservationManager, StockStrategy};
use crate::store::{CommerceStore, EventStore};
use crate::sweeper::ReservationSweeper;
use std::sync::Arc;

#[derive(Clone)]
pub struct Engine {
  pub store: Arc<dyn CommerceStore>,
  pub stock: Arc<dyn StockStrategy>,
  pub events: OrderEventLog,
  pub notifications: NotificationDispatcher,
  pub gateway: Arc<dyn PaymentGateway>,
  pub order_numbers: Arc<dyn OrderNumberGenerator>,
  pub config: Arc<OrderflowConfig>,
}

impl Engine {
  pub fn new(
    store: Arc<dyn CommerceStore>,
    event_store: Arc<dyn EventStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: NotificationDispatcher,
    config: OrderflowConfig,
  ) -> Self {
    Self {
      store,
      stock: Arc::new(StockReservationManager::new(config.reservation_ttl)),
      events: OrderEventLog::new(event_store),
      notifications,
      gateway,
      order_numbers: Arc::new(RandomOrderNumbers),
      config: Arc::new(config),
    }
  }

  pub fn with_order_numbers(mut self, generator: Arc<dyn OrderNumberGenerator>) -> Self {
    self.order_numbers = generator;
    self
  }

  pub fn orchestrator(&self) -> OrderOrchestrator {
    OrderOrchestrator::new(self.clone())
  }

  pub fn reconciler(&self) -> PaymentReconciler {
    PaymentReconciler::new(self.clone())
  }

  pub fn sweeper(&self) -> ReservationSweeper {
    ReservationSweeper::new(
      self.store.clone(),
      self.stock.clone(),
      self.events.clone(),
      self.notifications.clone(),
      self.config.sweep_interval,
      self.config.sweep_batch_size,
    )
  }
}
