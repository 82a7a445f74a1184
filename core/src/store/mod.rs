// orderflow/src/store/mod.rs

//! Persistence boundary.
//!
//! Everything that must commit or roll back together goes through a [`StoreTx`] obtained
//! from [`CommerceStore::begin`]. Dropping a transaction without calling `commit` rolls it
//! back. The event timeline lives behind the separate, non-transactional [`EventStore`]
//! so a failed timeline write can never poison the primary transaction.

pub mod memory;

use crate::error::{OrderflowError, Result};
use crate::model::{
  Cart, NewOrderEvent, Order, OrderEvent, OrderFilter, OrderItem, Payment, Product, ReservationStatus, StockLevel,
  StockReservation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub use memory::MemoryStore;

/// Atomic per-product stock primitives. Each call is a single conditional update, so two
/// transactions can never both take the last unit.
#[async_trait]
pub trait InventoryLedger: Send {
  async fn check_availability(&mut self, product_id: Uuid) -> Result<StockLevel>;

  /// `reserved += qty` only if `available >= qty`; otherwise `InsufficientStock`.
  async fn reserve(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel>;

  /// `reserved -= qty` and `on_hand -= qty`: a hold becomes a permanent deduction.
  async fn confirm(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel>;

  /// `reserved -= qty`: a hold is handed back to available stock.
  async fn release(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel>;

  /// `on_hand += qty`: stock that was already deducted comes back.
  async fn restore(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel>;
}

#[async_trait]
pub trait ReservationRepository: Send {
  async fn insert_reservations(&mut self, reservations: &[StockReservation]) -> Result<()>;

  async fn reservations_for_order(&mut self, order_id: Uuid) -> Result<Vec<StockReservation>>;

  /// Moves one reservation out of `Active`. Returns `false` when it was no longer active,
  /// which is what keeps termination single-shot.
  async fn terminate_reservation(
    &mut self,
    reservation_id: Uuid,
    to: ReservationStatus,
    at: DateTime<Utc>,
  ) -> Result<bool>;

  /// Candidate rows for expiry. Not locked: the caller locks the owning orders first and
  /// relies on [`terminate_reservation`](Self::terminate_reservation) being conditional.
  async fn expired_reservations(&mut self, now: DateTime<Utc>, limit: usize) -> Result<Vec<StockReservation>>;
}

#[async_trait]
pub trait CartRepository: Send {
  async fn active_cart(&mut self, user_id: Uuid) -> Result<Option<Cart>>;

  /// Marks the cart converted into `order_id` and empties it.
  async fn convert_cart(&mut self, cart_id: Uuid, order_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait ProductCatalog: Send {
  /// Bulk lookup. Missing ids are simply absent from the result.
  async fn products_by_ids(&mut self, ids: &[Uuid]) -> Result<Vec<Product>>;
}

#[async_trait]
pub trait OrderRepository: Send {
  /// A number already in use yields `OrderNumberTaken` and leaves the transaction usable.
  async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<()>;

  async fn order_number_exists(&mut self, order_number: &str) -> Result<bool>;

  /// Reads the order, locking it for the rest of the transaction where the backend can.
  async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>>;

  async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>>;

  async fn list_orders(&mut self, filter: &OrderFilter) -> Result<Vec<Order>>;

  /// Locks whichever of `order_ids` no other transaction holds and returns those ids.
  async fn lock_orders(&mut self, order_ids: &[Uuid]) -> Result<Vec<Uuid>>;

  /// Unpaid pending orders whose `payment_due_at` has passed, locked like
  /// [`lock_orders`](Self::lock_orders).
  async fn overdue_orders(&mut self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>>;

  /// Compare-and-swap on `order.version`. On success the stored row and `order.version`
  /// are both bumped by one; a stale version yields `Conflict`.
  async fn update_order(&mut self, order: &mut Order) -> Result<()>;
}

#[async_trait]
pub trait PaymentRepository: Send {
  async fn insert_payment(&mut self, payment: &Payment) -> Result<()>;

  /// Finds a payment whose session id or transaction id equals `reference`.
  async fn find_payment_by_reference(&mut self, reference: &str) -> Result<Option<Payment>>;

  async fn payments_for_order(&mut self, order_id: Uuid) -> Result<Vec<Payment>>;

  async fn update_payment(&mut self, payment: &Payment) -> Result<()>;
}

/// One unit of work across every repository.
#[async_trait]
pub trait StoreTx:
  InventoryLedger + ReservationRepository + CartRepository + ProductCatalog + OrderRepository + PaymentRepository + Send
{
  async fn commit(self: Box<Self>) -> Result<()>;

  async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait CommerceStore: Send + Sync {
  async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

/// Append-only order timeline.
#[async_trait]
pub trait EventStore: Send + Sync {
  async fn append(&self, event: NewOrderEvent) -> Result<OrderEvent>;

  /// Events in creation order, optionally restricted to customer-visible ones.
  async fn events_for_order(&self, order_id: Uuid, public_only: bool) -> Result<Vec<OrderEvent>>;
}

/// A transaction shared between the handlers of one pipeline run.
///
/// Handlers lock it for the duration of their storage calls; the owner takes it back
/// with [`TxHandle::into_inner`] to commit or roll back once the run is over.
#[derive(Clone)]
pub struct TxHandle(Arc<Mutex<Box<dyn StoreTx>>>);

impl TxHandle {
  pub fn new(tx: Box<dyn StoreTx>) -> Self {
    TxHandle(Arc::new(Mutex::new(tx)))
  }

  pub async fn lock(&self) -> MutexGuard<'_, Box<dyn StoreTx>> {
    self.0.lock().await
  }

  pub fn into_inner(self) -> Result<Box<dyn StoreTx>> {
    Arc::try_unwrap(self.0)
      .map(Mutex::into_inner)
      .map_err(|_| OrderflowError::Internal("transaction handle is still shared".to_string()))
  }
}
