// orderflow/src/lib.rs

//! Orderflow: the order–payment–inventory reconciliation engine.
//!
//! Orderflow takes a cart to a paid, shipped order without overselling stock,
//! double-charging or leaking reservations:
//!  - An ordered step pipeline drives the multi-step workflows (order creation, webhooks).
//!  - Stock is held per order through a single reservation strategy and committed once.
//!  - Order updates are compare-and-swap on a version counter.
//!  - Gateway webhooks and client confirmations converge on one idempotent state machine.
//!  - The timeline and customer notifications are best-effort and never block a mutation.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod reconciler;
pub mod reservation;
pub mod store;
pub mod sweeper;
pub mod validation;

// --- Re-exports for the Public API ---

pub use crate::config::OrderflowConfig;
pub use crate::engine::Engine;
pub use crate::error::{OrderflowError, Result};
pub use crate::events::OrderEventLog;
pub use crate::notify::{Notification, NotificationDispatcher, NotificationWorker, Notifier};
pub use crate::orchestrator::numbers::{OrderNumberGenerator, RandomOrderNumbers};
pub use crate::orchestrator::{OrderDetails, OrderOrchestrator};
pub use crate::pipeline::{ContextData, Pipeline, PipelineControl, PipelineResult};
pub use crate::reconciler::{CheckoutSession, GatewayEvent, PaymentGateway, PaymentReconciler, ReconcileOutcome, SessionState};
pub use crate::reservation::{StockReservationManager, StockStrategy};
pub use crate::store::{CommerceStore, EventStore, MemoryStore, StoreTx};
pub use crate::sweeper::ReservationSweeper;
