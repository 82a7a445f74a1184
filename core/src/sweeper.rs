// orderflow/src/sweeper.rs

//! Periodic housekeeping: releases reservations whose TTL ran out and cancels orders
//! left unpaid past their payment deadline.

use crate::error::Result;
use crate::events::OrderEventLog;
use crate::model::{Actor, NewOrderEvent, OrderEventType, OrderStatus, ReservationStatus};
use crate::notify::NotificationDispatcher;
use crate::orchestrator::{stock_events, StockReturn};
use crate::reservation::StockStrategy;
use crate::store::{CommerceStore, OrderRepository, ReservationRepository};
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ReservationSweeper {
  store: Arc<dyn CommerceStore>,
  stock: Arc<dyn StockStrategy>,
  events: OrderEventLog,
  notifications: NotificationDispatcher,
  interval: Duration,
  batch_size: usize,
}

const PAYMENT_TIMEOUT_REASON: &str = "payment not received before the deadline";

impl ReservationSweeper {
  pub fn new(
    store: Arc<dyn CommerceStore>,
    stock: Arc<dyn StockStrategy>,
    events: OrderEventLog,
    notifications: NotificationDispatcher,
    interval: Duration,
    batch_size: usize,
  ) -> Self {
    Self {
      store,
      stock,
      events,
      notifications,
      interval,
      batch_size: batch_size.max(1),
    }
  }

  /// Runs one sweep. Returns how many reservations were expired.
  #[instrument(name = "ReservationSweeper::sweep_once", skip(self), err(Display))]
  pub async fn sweep_once(&self) -> Result<usize> {
    let now = Utc::now();
    let mut tx = self.store.begin().await?;
    let expired = self.stock.expire_stale(tx.as_mut(), now, self.batch_size).await?;
    if expired.is_empty() {
      tx.rollback().await?;
      return Ok(0);
    }

    let mut per_order: BTreeMap<Uuid, Vec<serde_json::Value>> = BTreeMap::new();
    for r in &expired {
      per_order
        .entry(r.order_id)
        .or_default()
        .push(json!({ "product_id": r.product_id, "quantity": r.quantity }));
    }

    for &order_id in per_order.keys() {
      let still_active = tx
        .reservations_for_order(order_id)
        .await?
        .iter()
        .any(|r| r.status == ReservationStatus::Active);
      if still_active {
        continue;
      }
      match tx.find_order(order_id).await? {
        Some(mut order) if order.has_active_reservation => {
          order.has_active_reservation = false;
          order.updated_at = now;
          tx.update_order(&mut order).await?;
        }
        Some(_) => {}
        None => warn!(%order_id, "Expired reservation belongs to an unknown order."),
      }
    }
    tx.commit().await?;

    for (order_id, items) in per_order {
      self
        .events
        .record(
          NewOrderEvent::new(order_id, OrderEventType::ReservationExpired, Actor::System)
            .with_payload(json!({ "items": items })),
        )
        .await;
    }
    info!(count = expired.len(), "Expired stale reservations.");
    Ok(expired.len())
  }

  /// Cancels pending orders whose payment deadline passed. Returns how many were cancelled.
  /// A payment that still arrives afterwards is settled as paid-after-cancel.
  #[instrument(name = "ReservationSweeper::cancel_overdue", skip(self), err(Display))]
  pub async fn cancel_overdue(&self) -> Result<usize> {
    let now = Utc::now();
    let mut tx = self.store.begin().await?;
    let overdue = tx.overdue_orders(now, self.batch_size).await?;
    if overdue.is_empty() {
      tx.rollback().await?;
      return Ok(0);
    }

    let mut cancelled = Vec::with_capacity(overdue.len());
    for mut order in overdue {
      let returned = StockReturn {
        released: self
          .stock
          .release_for_order(tx.as_mut(), order.id, ReservationStatus::Expired, now)
          .await?,
        ..StockReturn::default()
      };
      order.has_active_reservation = false;
      let from = order.transition_to(OrderStatus::Cancelled, now)?;
      order.cancelled_at = Some(now);
      order.cancellation_reason = Some(PAYMENT_TIMEOUT_REASON.to_string());
      tx.update_order(&mut order).await?;
      cancelled.push((order, from, returned));
    }
    tx.commit().await?;

    for (order, from, returned) in &cancelled {
      let mut events = vec![NewOrderEvent::new(order.id, OrderEventType::Cancelled, Actor::System)
        .with_payload(json!({ "from": from, "reason": PAYMENT_TIMEOUT_REASON }))];
      events.extend(stock_events(order.id, returned, &Actor::System));
      self.events.record_all(events).await;
      self.notifications.notify_order_cancelled(order);
    }
    info!(count = cancelled.len(), "Cancelled orders past their payment deadline.");
    Ok(cancelled.len())
  }

  /// Sweeps on a fixed interval until `shutdown` flips to `true` or its sender is dropped.
  pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      info!(interval_ms = self.interval.as_millis() as u64, "Reservation sweeper started.");
      loop {
        tokio::select! {
          _ = ticker.tick() => {
            if let Err(err) = self.sweep_once().await {
              error!(error = %err, "Reservation sweep failed.");
            }
            if let Err(err) = self.cancel_overdue().await {
              error!(error = %err, "Payment deadline sweep failed.");
            }
          }
          changed = shutdown.changed() => {
            if changed.is_err() || *shutdown.borrow() {
              break;
            }
          }
        }
      }
      info!("Reservation sweeper stopped.");
    })
  }
}
