// orderflow/src/store/memory.rs

//! In-process reference backend.
//!
//! Transactions are serialisable: `begin` takes an exclusive lock on the whole state and
//! works on a copy, `commit` swaps the copy in, and dropping the transaction discards it.
//! Used by the test-suite and handy for local demos; production runs on PostgreSQL.

use super::{
  CartRepository, CommerceStore, EventStore, InventoryLedger, OrderRepository, PaymentRepository, ProductCatalog,
  ReservationRepository, StoreTx,
};
use crate::error::{OrderflowError, Result};
use crate::model::{
  Cart, CartItem, NewOrderEvent, Order, OrderEvent, OrderFilter, OrderItem, Payment, Product, ReservationStatus,
  StockLevel, StockReservation,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
  products: HashMap<Uuid, Product>,
  stock: HashMap<Uuid, StockLevel>,
  carts: HashMap<Uuid, Cart>,
  orders: HashMap<Uuid, Order>,
  order_items: HashMap<Uuid, Vec<OrderItem>>,
  payments: HashMap<Uuid, Payment>,
  reservations: HashMap<Uuid, StockReservation>,
}

#[derive(Debug, Default)]
struct EventLogState {
  events: Vec<OrderEvent>,
  next_sequence: i64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
  state: Arc<Mutex<MemoryState>>,
  events: Arc<parking_lot::Mutex<EventLogState>>,
  fail_event_appends: Arc<AtomicBool>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds (or replaces) a product with `on_hand` units and nothing reserved.
  pub async fn seed_product(&self, product: Product, on_hand: i32) {
    let mut state = self.state.lock().await;
    state.stock.insert(
      product.id,
      StockLevel {
        product_id: product.id,
        on_hand,
        reserved: 0,
      },
    );
    state.products.insert(product.id, product);
  }

  /// Replaces the user's active cart.
  pub async fn seed_cart(&self, user_id: Uuid, items: Vec<CartItem>) -> Cart {
    let mut state = self.state.lock().await;
    state
      .carts
      .retain(|_, cart| cart.user_id != user_id || cart.converted_order_id.is_some());
    let cart = Cart {
      id: Uuid::new_v4(),
      user_id,
      items,
      converted_order_id: None,
    };
    state.carts.insert(cart.id, cart.clone());
    cart
  }

  pub async fn stock_level(&self, product_id: Uuid) -> Option<StockLevel> {
    self.state.lock().await.stock.get(&product_id).copied()
  }

  pub async fn reservations(&self, order_id: Uuid) -> Vec<StockReservation> {
    let state = self.state.lock().await;
    sorted_reservations(state.reservations.values().filter(|r| r.order_id == order_id))
  }

  pub async fn payments(&self, order_id: Uuid) -> Vec<Payment> {
    let state = self.state.lock().await;
    let mut payments: Vec<Payment> = state.payments.values().filter(|p| p.order_id == order_id).cloned().collect();
    payments.sort_by_key(|p| p.created_at);
    payments
  }

  pub async fn order(&self, order_id: Uuid) -> Option<Order> {
    self.state.lock().await.orders.get(&order_id).cloned()
  }

  pub async fn order_count(&self) -> usize {
    self.state.lock().await.orders.len()
  }

  /// Makes every subsequent timeline append fail, to exercise the best-effort path.
  pub fn set_event_failures(&self, fail: bool) {
    self.fail_event_appends.store(fail, Ordering::SeqCst);
  }
}

fn sorted_reservations<'a>(iter: impl Iterator<Item = &'a StockReservation>) -> Vec<StockReservation> {
  let mut reservations: Vec<StockReservation> = iter.cloned().collect();
  reservations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
  reservations
}

#[async_trait]
impl CommerceStore for MemoryStore {
  async fn begin(&self) -> Result<Box<dyn StoreTx>> {
    let guard = self.state.clone().lock_owned().await;
    let working = guard.clone();
    Ok(Box::new(MemoryTx { guard, working }))
  }
}

pub struct MemoryTx {
  guard: OwnedMutexGuard<MemoryState>,
  working: MemoryState,
}

impl MemoryTx {
  fn stock_mut(&mut self, product_id: Uuid) -> Result<&mut StockLevel> {
    self
      .working
      .stock
      .get_mut(&product_id)
      .ok_or(OrderflowError::ProductUnavailable { product_id })
  }
}

fn positive(qty: i32) -> Result<()> {
  if qty <= 0 {
    return Err(OrderflowError::Validation(format!("quantity must be positive, got {}", qty)));
  }
  Ok(())
}

#[async_trait]
impl InventoryLedger for MemoryTx {
  async fn check_availability(&mut self, product_id: Uuid) -> Result<StockLevel> {
    Ok(*self.stock_mut(product_id)?)
  }

  async fn reserve(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel> {
    positive(qty)?;
    let level = self.stock_mut(product_id)?;
    if level.available() < qty {
      return Err(OrderflowError::InsufficientStock {
        product_id,
        requested: qty,
        available: level.available(),
      });
    }
    level.reserved += qty;
    Ok(*level)
  }

  async fn confirm(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel> {
    positive(qty)?;
    let level = self.stock_mut(product_id)?;
    if level.reserved < qty || level.on_hand < qty {
      return Err(OrderflowError::storage(anyhow!(
        "cannot confirm {} units of {}: reserved {}, on hand {}",
        qty,
        product_id,
        level.reserved,
        level.on_hand
      )));
    }
    level.reserved -= qty;
    level.on_hand -= qty;
    Ok(*level)
  }

  async fn release(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel> {
    positive(qty)?;
    let level = self.stock_mut(product_id)?;
    if level.reserved < qty {
      return Err(OrderflowError::storage(anyhow!(
        "cannot release {} units of {}: only {} reserved",
        qty,
        product_id,
        level.reserved
      )));
    }
    level.reserved -= qty;
    Ok(*level)
  }

  async fn restore(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel> {
    positive(qty)?;
    let level = self.stock_mut(product_id)?;
    level.on_hand += qty;
    Ok(*level)
  }
}

#[async_trait]
impl ReservationRepository for MemoryTx {
  async fn insert_reservations(&mut self, reservations: &[StockReservation]) -> Result<()> {
    for reservation in reservations {
      self.working.reservations.insert(reservation.id, reservation.clone());
    }
    Ok(())
  }

  async fn reservations_for_order(&mut self, order_id: Uuid) -> Result<Vec<StockReservation>> {
    Ok(sorted_reservations(
      self.working.reservations.values().filter(|r| r.order_id == order_id),
    ))
  }

  async fn terminate_reservation(
    &mut self,
    reservation_id: Uuid,
    to: ReservationStatus,
    at: DateTime<Utc>,
  ) -> Result<bool> {
    match self.working.reservations.get_mut(&reservation_id) {
      Some(r) if r.status == ReservationStatus::Active => {
        r.status = to;
        r.terminated_at = Some(at);
        Ok(true)
      }
      Some(_) => Ok(false),
      None => Err(OrderflowError::storage(anyhow!("reservation {} not found", reservation_id))),
    }
  }

  async fn expired_reservations(&mut self, now: DateTime<Utc>, limit: usize) -> Result<Vec<StockReservation>> {
    let mut expired = sorted_reservations(self.working.reservations.values().filter(|r| r.is_expired_at(now)));
    expired.truncate(limit);
    Ok(expired)
  }
}

#[async_trait]
impl CartRepository for MemoryTx {
  async fn active_cart(&mut self, user_id: Uuid) -> Result<Option<Cart>> {
    Ok(
      self
        .working
        .carts
        .values()
        .find(|c| c.user_id == user_id && c.converted_order_id.is_none())
        .cloned(),
    )
  }

  async fn convert_cart(&mut self, cart_id: Uuid, order_id: Uuid) -> Result<()> {
    let cart = self
      .working
      .carts
      .get_mut(&cart_id)
      .ok_or_else(|| OrderflowError::storage(anyhow!("cart {} not found", cart_id)))?;
    cart.converted_order_id = Some(order_id);
    cart.items.clear();
    Ok(())
  }
}

#[async_trait]
impl ProductCatalog for MemoryTx {
  async fn products_by_ids(&mut self, ids: &[Uuid]) -> Result<Vec<Product>> {
    Ok(ids.iter().filter_map(|id| self.working.products.get(id).cloned()).collect())
  }
}

#[async_trait]
impl OrderRepository for MemoryTx {
  async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<()> {
    if self.working.orders.values().any(|o| o.order_number == order.order_number) {
      return Err(OrderflowError::OrderNumberTaken(order.order_number.clone()));
    }
    self.working.orders.insert(order.id, order.clone());
    self.working.order_items.insert(order.id, items.to_vec());
    Ok(())
  }

  async fn order_number_exists(&mut self, order_number: &str) -> Result<bool> {
    Ok(self.working.orders.values().any(|o| o.order_number == order_number))
  }

  async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>> {
    Ok(self.working.orders.get(&order_id).cloned())
  }

  async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>> {
    Ok(self.working.order_items.get(&order_id).cloned().unwrap_or_default())
  }

  async fn list_orders(&mut self, filter: &OrderFilter) -> Result<Vec<Order>> {
    let mut orders: Vec<Order> = self
      .working
      .orders
      .values()
      .filter(|o| filter.user_id.map_or(true, |u| o.user_id == u))
      .filter(|o| filter.status.map_or(true, |s| o.status == s))
      .filter(|o| filter.payment_status.map_or(true, |s| o.payment_status == s))
      .filter(|o| filter.created_from.map_or(true, |from| o.created_at >= from))
      .filter(|o| filter.created_to.map_or(true, |to| o.created_at < to))
      .cloned()
      .collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    Ok(
      orders
        .into_iter()
        .skip(filter.offset.unwrap_or(0) as usize)
        .take(filter.effective_limit() as usize)
        .collect(),
    )
  }

  async fn lock_orders(&mut self, order_ids: &[Uuid]) -> Result<Vec<Uuid>> {
    // The transaction already holds the whole store.
    Ok(order_ids.to_vec())
  }

  async fn overdue_orders(&mut self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>> {
    let mut overdue: Vec<Order> = self
      .working
      .orders
      .values()
      .filter(|o| o.is_overdue(now))
      .cloned()
      .collect();
    overdue.sort_by_key(|o| (o.payment_due_at, o.id));
    overdue.truncate(limit);
    Ok(overdue)
  }

  async fn update_order(&mut self, order: &mut Order) -> Result<()> {
    let stored = self
      .working
      .orders
      .get_mut(&order.id)
      .ok_or_else(|| OrderflowError::OrderNotFound(order.id.to_string()))?;
    if stored.version != order.version {
      return Err(OrderflowError::Conflict {
        order_id: order.id,
        expected_version: order.version,
      });
    }
    order.version += 1;
    *stored = order.clone();
    Ok(())
  }
}

#[async_trait]
impl PaymentRepository for MemoryTx {
  async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
    let clash = self.working.payments.values().any(|p| {
      payment.external_id.as_deref().is_some_and(|r| p.matches_reference(r))
        || payment.transaction_id.as_deref().is_some_and(|r| p.matches_reference(r))
    });
    if clash {
      return Err(OrderflowError::storage(anyhow!("duplicate gateway reference for payment {}", payment.id)));
    }
    self.working.payments.insert(payment.id, payment.clone());
    Ok(())
  }

  async fn find_payment_by_reference(&mut self, reference: &str) -> Result<Option<Payment>> {
    Ok(self.working.payments.values().find(|p| p.matches_reference(reference)).cloned())
  }

  async fn payments_for_order(&mut self, order_id: Uuid) -> Result<Vec<Payment>> {
    let mut payments: Vec<Payment> =
      self.working.payments.values().filter(|p| p.order_id == order_id).cloned().collect();
    payments.sort_by_key(|p| p.created_at);
    Ok(payments)
  }

  async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
    if !self.working.payments.contains_key(&payment.id) {
      return Err(OrderflowError::PaymentNotFound(payment.id.to_string()));
    }
    self.working.payments.insert(payment.id, payment.clone());
    Ok(())
  }
}

#[async_trait]
impl StoreTx for MemoryTx {
  async fn commit(self: Box<Self>) -> Result<()> {
    let MemoryTx { mut guard, working } = *self;
    *guard = working;
    debug!("Memory transaction committed.");
    Ok(())
  }

  async fn rollback(self: Box<Self>) -> Result<()> {
    debug!("Memory transaction rolled back.");
    Ok(())
  }
}

#[async_trait]
impl EventStore for MemoryStore {
  async fn append(&self, event: NewOrderEvent) -> Result<OrderEvent> {
    if self.fail_event_appends.load(Ordering::SeqCst) {
      return Err(OrderflowError::storage(anyhow!("event store unavailable")));
    }
    let mut log = self.events.lock();
    log.next_sequence += 1;
    let stored = OrderEvent {
      id: Uuid::new_v4(),
      sequence: log.next_sequence,
      order_id: event.order_id,
      event_type: event.event_type,
      payload: event.payload,
      actor: event.actor,
      is_public: event.is_public,
      created_at: Utc::now(),
    };
    log.events.push(stored.clone());
    Ok(stored)
  }

  async fn events_for_order(&self, order_id: Uuid, public_only: bool) -> Result<Vec<OrderEvent>> {
    let log = self.events.lock();
    Ok(
      log
        .events
        .iter()
        .filter(|e| e.order_id == order_id && (!public_only || e.is_public))
        .cloned()
        .collect(),
    )
  }
}
