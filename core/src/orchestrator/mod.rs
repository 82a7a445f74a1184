// orderflow/src/orchestrator/mod.rs

//! Order Orchestrator: owns every order mutation and its transaction boundary.
//!
//! Each operation opens one transaction, re-reads the order inside it, applies the change
//! through the central transition table and writes it back with a version check. Timeline
//! entries and notifications are produced only after the commit succeeded.

pub mod checkout;
pub mod create;
pub mod lifecycle;
pub mod numbers;

use crate::engine::Engine;
use crate::error::{OrderflowError, Result};
use crate::model::{
  Actor, NewOrderEvent, Order, OrderEventType, OrderFilter, OrderItem, OrderStatus, Payment, ReservationStatus,
  StockReservation,
};
use crate::pipeline::{ContextData, Pipeline, PipelineResult};
use crate::reservation::StockStrategy;
use crate::store::{InventoryLedger, OrderRepository, PaymentRepository, StoreTx, TxHandle};
use chrono::{DateTime, Utc};
use create::{build_create_order_pipeline, CreateOrderCtx};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// An order with its line items and payment attempts.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
  #[serde(flatten)]
  pub order: Order,
  pub items: Vec<OrderItem>,
  pub payments: Vec<Payment>,
}

#[derive(Clone)]
pub struct OrderOrchestrator {
  engine: Engine,
  create_pipeline: Arc<Pipeline<CreateOrderCtx, OrderflowError>>,
}

impl OrderOrchestrator {
  pub fn new(engine: Engine) -> Self {
    let create_pipeline = build_create_order_pipeline(
      engine.store.clone(),
      engine.stock.clone(),
      engine.order_numbers.clone(),
      engine.config.clone(),
    );
    Self {
      engine,
      create_pipeline: Arc::new(create_pipeline),
    }
  }

  /// Turns the user's cart into a pending order holding reserved stock.
  #[instrument(name = "OrderOrchestrator::create_order", skip_all, fields(%user_id), err(Display))]
  pub async fn create_order(&self, user_id: Uuid, request: crate::model::CreateOrderRequest) -> Result<OrderDetails> {
    let ctx = ContextData::new(CreateOrderCtx::new(user_id, request, Utc::now()));
    let outcome = self.create_pipeline.run(ctx.clone()).await;
    let tx = ctx.write().tx.take();

    match outcome {
      Ok(PipelineResult::Completed) => {}
      Ok(PipelineResult::Stopped) => {
        rollback_quietly(tx).await;
        return Err(OrderflowError::Internal("create-order pipeline stopped early".to_string()));
      }
      Err(err) => {
        rollback_quietly(tx).await;
        return Err(err);
      }
    }

    let tx = tx
      .ok_or_else(|| OrderflowError::Internal("create-order pipeline finished without a transaction".to_string()))?
      .into_inner()?;
    tx.commit().await?;

    let (order, items, payment, events) = {
      let mut c = ctx.write();
      (
        c.order.take(),
        std::mem::take(&mut c.items),
        c.payment.take(),
        std::mem::take(&mut c.pending_events),
      )
    };
    let order = order.ok_or_else(|| OrderflowError::Internal("create-order pipeline produced no order".to_string()))?;

    self.engine.events.record_all(events).await;
    self.engine.notifications.notify_order_created(&order);
    info!(order_id = %order.id, order_number = %order.order_number, total = %order.totals.total, "Order created.");

    Ok(OrderDetails {
      order,
      items,
      payments: payment.into_iter().collect(),
    })
  }

  /// Reads an order. Customers only see their own orders; anything else is "not found".
  pub async fn get_order(&self, order_id: Uuid, viewer: &Actor) -> Result<OrderDetails> {
    let mut tx = self.engine.store.begin().await?;
    let details = load_details(tx.as_mut(), order_id).await;
    tx.rollback().await?;
    let details = details?;
    ensure_visible(&details.order, viewer)?;
    Ok(details)
  }

  /// Resolves the order a gateway checkout session belongs to.
  pub async fn get_by_session_id(&self, session_id: &str, viewer: &Actor) -> Result<OrderDetails> {
    let mut tx = self.engine.store.begin().await?;
    let details = match tx.find_payment_by_reference(session_id).await {
      Ok(Some(payment)) => load_details(tx.as_mut(), payment.order_id).await,
      Ok(None) => Err(OrderflowError::OrderNotFound(format!("session {}", session_id))),
      Err(err) => Err(err),
    };
    tx.rollback().await?;
    let details = details?;
    ensure_visible(&details.order, viewer)?;
    Ok(details)
  }

  /// Newest first. Customers are always restricted to their own orders.
  pub async fn list_orders(&self, mut filter: OrderFilter, viewer: &Actor) -> Result<Vec<Order>> {
    if let Actor::Customer(user_id) = viewer {
      filter.user_id = Some(*user_id);
    }
    let mut tx = self.engine.store.begin().await?;
    let orders = tx.list_orders(&filter).await;
    tx.rollback().await?;
    orders
  }

  pub fn engine(&self) -> &Engine {
    &self.engine
  }
}

async fn rollback_quietly(tx: Option<TxHandle>) {
  let Some(handle) = tx else { return };
  match handle.into_inner() {
    Ok(tx) => {
      if let Err(err) = tx.rollback().await {
        warn!(error = %err, "Rollback failed; the transaction is discarded on drop.");
      }
    }
    Err(err) => warn!(error = %err, "Could not reclaim the transaction for rollback."),
  }
}

pub(crate) async fn load_order(tx: &mut dyn StoreTx, order_id: Uuid) -> Result<Order> {
  tx.find_order(order_id)
    .await?
    .ok_or_else(|| OrderflowError::OrderNotFound(order_id.to_string()))
}

async fn load_details(tx: &mut dyn StoreTx, order_id: Uuid) -> Result<OrderDetails> {
  let order = load_order(tx, order_id).await?;
  let items = tx.order_items(order_id).await?;
  let payments = tx.payments_for_order(order_id).await?;
  Ok(OrderDetails { order, items, payments })
}

/// Customers may only act on their own orders. Other actors are authorised upstream.
pub(crate) fn ensure_visible(order: &Order, viewer: &Actor) -> Result<()> {
  match viewer {
    Actor::Customer(user_id) if *user_id != order.user_id => Err(OrderflowError::OrderNotFound(order.id.to_string())),
    _ => Ok(()),
  }
}

/// What happened to an order's stock when it was given back.
#[derive(Debug, Default)]
pub(crate) struct StockReturn {
  pub restored: Vec<(Uuid, i32)>,
  pub released: Vec<StockReservation>,
}

/// Puts deducted stock back on hand.
pub(crate) async fn restore_committed(tx: &mut dyn StoreTx, order: &mut Order) -> Result<Vec<(Uuid, i32)>> {
  let mut lines: BTreeMap<Uuid, i32> = BTreeMap::new();
  for item in tx.order_items(order.id).await? {
    *lines.entry(item.product_id).or_insert(0) += item.quantity;
  }
  for (&product_id, &qty) in &lines {
    tx.restore(product_id, qty).await?;
  }
  order.stock_committed = false;
  Ok(lines.into_iter().collect())
}

/// Releases any active holds of the order (idempotent).
pub(crate) async fn release_active(
  tx: &mut dyn StoreTx,
  stock: &dyn StockStrategy,
  order: &mut Order,
  now: DateTime<Utc>,
) -> Result<Vec<StockReservation>> {
  let released = stock
    .release_for_order(tx, order.id, ReservationStatus::Released, now)
    .await?;
  order.has_active_reservation = false;
  Ok(released)
}

pub(crate) fn status_event(order: &Order, from: OrderStatus, actor: &Actor) -> NewOrderEvent {
  let event_type = match order.status {
    OrderStatus::Shipped => OrderEventType::Shipped,
    OrderStatus::Delivered => OrderEventType::Delivered,
    OrderStatus::Cancelled => OrderEventType::Cancelled,
    OrderStatus::Refunded => OrderEventType::Refunded,
    _ => OrderEventType::StatusChanged,
  };
  NewOrderEvent::new(order.id, event_type, actor.clone())
    .with_payload(json!({ "from": from, "to": order.status }))
    .visibility(order.status.is_customer_visible())
}

pub(crate) fn stock_events(order_id: Uuid, returned: &StockReturn, actor: &Actor) -> Vec<NewOrderEvent> {
  let mut events = Vec::new();
  if !returned.released.is_empty() {
    let items: Vec<_> = returned
      .released
      .iter()
      .map(|r| json!({ "product_id": r.product_id, "quantity": r.quantity }))
      .collect();
    events.push(
      NewOrderEvent::new(order_id, OrderEventType::InventoryReleased, actor.clone()).with_payload(json!({ "items": items })),
    );
  }
  if !returned.restored.is_empty() {
    let items: Vec<_> = returned
      .restored
      .iter()
      .map(|(product_id, quantity)| json!({ "product_id": product_id, "quantity": quantity }))
      .collect();
    events.push(
      NewOrderEvent::new(order_id, OrderEventType::InventoryRestored, actor.clone()).with_payload(json!({ "items": items })),
    );
  }
  events
}

/// Converts active holds into a deduction; re-acquires stock if the holds expired.
pub(crate) async fn commit_order_stock(
  tx: &mut dyn StoreTx,
  stock: &dyn StockStrategy,
  order: &mut Order,
  actor: &Actor,
  now: DateTime<Utc>,
) -> Result<Vec<NewOrderEvent>> {
  if order.stock_committed {
    return Ok(Vec::new());
  }
  let mut events = Vec::new();
  let confirmed = stock.confirm_for_order(tx, order.id, now).await?;
  if confirmed.is_empty() {
    let lines: Vec<(Uuid, i32)> = tx
      .order_items(order.id)
      .await?
      .iter()
      .map(|i| (i.product_id, i.quantity))
      .collect();
    let shortfalls = stock.reacquire_for_order(tx, order.id, &lines, now).await?;
    if !shortfalls.is_empty() {
      let items: Vec<_> = shortfalls
        .iter()
        .map(|s| json!({ "product_id": s.product_id, "requested": s.requested, "available": s.available }))
        .collect();
      events.push(
        NewOrderEvent::new(order.id, OrderEventType::InventoryShortfall, actor.clone())
          .with_payload(json!({ "items": items })),
      );
    }
  } else {
    let items: Vec<_> = confirmed
      .iter()
      .map(|r| json!({ "product_id": r.product_id, "quantity": r.quantity }))
      .collect();
    events.push(
      NewOrderEvent::new(order.id, OrderEventType::InventoryConfirmed, actor.clone())
        .with_payload(json!({ "items": items })),
    );
  }
  order.stock_committed = true;
  order.has_active_reservation = false;
  Ok(events)
}
