// orderflow/src/orchestrator/lifecycle.rs

//! Post-creation order workflows: cancel, status updates, shipping, delivery, notes.

use super::{
  commit_order_stock, ensure_visible, load_order, release_active, restore_committed, status_event, stock_events,
  OrderOrchestrator, StockReturn,
};
use crate::error::{OrderflowError, Result};
use crate::model::{
  Actor, FulfillmentStatus, NewOrderEvent, Order, OrderEvent, OrderEventType, OrderStatus, Payment, ShippingInfo,
};
use crate::reconciler::settle::settle_cash_on_delivery;
use crate::store::{OrderRepository, StoreTx};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const MAX_NOTE_CHARS: usize = 1000;

impl OrderOrchestrator {
  /// Cancels an order and gives its stock back according to how far payment got.
  #[instrument(name = "OrderOrchestrator::cancel_order", skip_all, fields(%order_id, actor = %actor), err(Display))]
  pub async fn cancel_order(&self, order_id: Uuid, actor: &Actor, reason: Option<String>) -> Result<Order> {
    let now = Utc::now();
    let mut tx = self.engine.store.begin().await?;
    let mut order = load_order(tx.as_mut(), order_id).await?;
    ensure_visible(&order, actor)?;
    if !order.status.can_be_cancelled() {
      return Err(OrderflowError::InvalidStateTransition {
        from: order.status,
        to: OrderStatus::Cancelled,
      });
    }

    let paid = order.is_paid();
    let mut returned = StockReturn::default();
    match (paid, order.stock_committed, order.has_active_reservation) {
      // Paid online, or cash on delivery confirmed before any money changed hands.
      (_, true, false) => {
        returned.restored = restore_committed(tx.as_mut(), &mut order).await?;
      }
      (false, false, true) => {
        returned.released = release_active(tx.as_mut(), self.engine.stock.as_ref(), &mut order, now).await?;
      }
      (false, false, false) => {
        debug!("Reservation already gone; no stock to return.");
      }
      (paid, committed, reserved) => {
        warn!(paid, committed, reserved, "Unexpected stock state on cancellation; cancelling anyway.");
        returned.released = release_active(tx.as_mut(), self.engine.stock.as_ref(), &mut order, now).await?;
        if order.stock_committed {
          returned.restored = restore_committed(tx.as_mut(), &mut order).await?;
        }
      }
    }

    let from = order.transition_to(OrderStatus::Cancelled, now)?;
    order.cancelled_at = Some(now);
    order.cancellation_reason = reason.clone();
    tx.update_order(&mut order).await?;
    tx.commit().await?;

    let mut events = vec![NewOrderEvent::new(order.id, OrderEventType::Cancelled, actor.clone())
      .with_payload(json!({ "from": from, "reason": reason }))];
    events.extend(stock_events(order.id, &returned, actor));
    if paid {
      events.push(
        NewOrderEvent::new(order.id, OrderEventType::RefundRequired, actor.clone())
          .with_payload(json!({ "amount": order.totals.total, "currency": order.currency })),
      );
    }
    self.engine.events.record_all(events).await;
    self.engine.notifications.notify_order_cancelled(&order);
    info!(%from, restored = returned.restored.len(), released = returned.released.len(), "Order cancelled.");
    Ok(order)
  }

  /// Generic status change along the transition table. Cancellation is routed to
  /// [`cancel_order`](Self::cancel_order) so its stock handling always applies.
  #[instrument(name = "OrderOrchestrator::update_status", skip_all, fields(%order_id, %next, actor = %actor), err(Display))]
  pub async fn update_status(&self, order_id: Uuid, next: OrderStatus, actor: &Actor) -> Result<Order> {
    if next == OrderStatus::Cancelled {
      return self.cancel_order(order_id, actor, None).await;
    }
    self.transition(order_id, next, actor, |_| Ok(())).await
  }

  /// Records carrier and tracking details and marks the order shipped.
  #[instrument(name = "OrderOrchestrator::update_shipping_info", skip_all, fields(%order_id, actor = %actor), err(Display))]
  pub async fn update_shipping_info(&self, order_id: Uuid, info: ShippingInfo, actor: &Actor) -> Result<Order> {
    let carrier = info.carrier.trim().to_string();
    let tracking_number = info.tracking_number.trim().to_string();
    if carrier.is_empty() || tracking_number.is_empty() {
      return Err(OrderflowError::Validation("carrier and tracking_number are required".to_string()));
    }
    self
      .transition(order_id, OrderStatus::Shipped, actor, move |order| {
        if !order.status.can_be_shipped() {
          return Err(OrderflowError::InvalidStateTransition {
            from: order.status,
            to: OrderStatus::Shipped,
          });
        }
        order.carrier = Some(carrier);
        order.tracking_number = Some(tracking_number);
        order.estimated_delivery = info.estimated_delivery;
        Ok(())
      })
      .await
  }

  /// Moves a shipped order to `OutForDelivery` or `Delivered`.
  #[instrument(name = "OrderOrchestrator::update_delivery_status", skip_all, fields(%order_id, %next, actor = %actor), err(Display))]
  pub async fn update_delivery_status(&self, order_id: Uuid, next: OrderStatus, actor: &Actor) -> Result<Order> {
    if !matches!(next, OrderStatus::OutForDelivery | OrderStatus::Delivered) {
      return Err(OrderflowError::Validation(format!(
        "delivery status must be out_for_delivery or delivered, got {}",
        next
      )));
    }
    self
      .transition(order_id, next, actor, move |order| {
        if !order.status.can_be_delivered() {
          return Err(OrderflowError::InvalidStateTransition { from: order.status, to: next });
        }
        Ok(())
      })
      .await
  }

  /// Appends a note to the order timeline. Unlike other timeline writes, a failed
  /// append is reported, since the note is the whole operation.
  pub async fn add_note(&self, order_id: Uuid, note: &str, actor: &Actor, is_public: bool) -> Result<OrderEvent> {
    let note = note.trim();
    if note.is_empty() || note.chars().count() > MAX_NOTE_CHARS {
      return Err(OrderflowError::Validation(format!(
        "note must be between 1 and {} characters",
        MAX_NOTE_CHARS
      )));
    }
    let mut tx = self.engine.store.begin().await?;
    let order = load_order(tx.as_mut(), order_id).await;
    tx.rollback().await?;
    let order = order?;
    ensure_visible(&order, actor)?;

    self
      .engine
      .events
      .try_record(
        NewOrderEvent::new(order.id, OrderEventType::NoteAdded, actor.clone())
          .with_payload(json!({ "note": note }))
          .visibility(is_public),
      )
      .await
  }

  /// Timeline in creation order. Customers only ever get the public entries.
  pub async fn get_events(&self, order_id: Uuid, viewer: &Actor, public_only: bool) -> Result<Vec<OrderEvent>> {
    let mut tx = self.engine.store.begin().await?;
    let order = load_order(tx.as_mut(), order_id).await;
    tx.rollback().await?;
    ensure_visible(&order?, viewer)?;
    let public_only = public_only || matches!(viewer, Actor::Customer(_));
    self.engine.events.events(order_id, public_only).await
  }

  /// Shared body of every non-cancel status change: guard, transition, side effects,
  /// versioned write, commit, then events and notification.
  async fn transition<G>(&self, order_id: Uuid, next: OrderStatus, actor: &Actor, guard: G) -> Result<Order>
  where
    G: FnOnce(&mut Order) -> Result<()> + Send,
  {
    let now = Utc::now();
    let mut tx = self.engine.store.begin().await?;
    let mut order = load_order(tx.as_mut(), order_id).await?;
    ensure_visible(&order, actor)?;
    guard(&mut order)?;

    let from = order.transition_to(next, now)?;
    let (mut events, settled) = self.apply_side_effects(tx.as_mut(), &mut order, actor, now).await?;
    tx.update_order(&mut order).await?;
    tx.commit().await?;

    let mut status = status_event(&order, from, actor);
    if order.status == OrderStatus::Shipped {
      status = status.with_payload(json!({
        "from": from,
        "to": order.status,
        "carrier": order.carrier,
        "tracking_number": order.tracking_number,
        "estimated_delivery": order.estimated_delivery,
      }));
    }
    events.insert(0, status);
    self.engine.events.record_all(events).await;
    self.engine.notifications.notify_order_status_changed(&order, from);
    if let Some(payment) = settled {
      self.engine.notifications.notify_payment_received(&order, payment.amount);
    }
    info!(%from, to = %order.status, "Order status updated.");
    Ok(order)
  }

  /// Stock, fulfilment and settlement effects of entering `order.status`. Also returns
  /// the payment settled on delivery, if any.
  async fn apply_side_effects(
    &self,
    tx: &mut dyn StoreTx,
    order: &mut Order,
    actor: &Actor,
    now: DateTime<Utc>,
  ) -> Result<(Vec<NewOrderEvent>, Option<Payment>)> {
    let mut events = Vec::new();
    let mut settled = None;
    match order.status {
      // Confirming (e.g. a cash-on-delivery order) or shipping commits held stock.
      OrderStatus::Confirmed | OrderStatus::Shipped => {
        events.extend(commit_order_stock(tx, self.engine.stock.as_ref(), order, actor, now).await?);
        if order.status == OrderStatus::Shipped {
          order.fulfillment_status = FulfillmentStatus::Shipped;
          order.shipped_at = Some(now);
        }
      }
      OrderStatus::Delivered => {
        order.fulfillment_status = FulfillmentStatus::Delivered;
        order.delivered_at = Some(now);
        if let Some(payment) = settle_cash_on_delivery(tx, order, now).await? {
          events.push(
            NewOrderEvent::new(order.id, OrderEventType::PaymentReceived, actor.clone())
              .with_payload(json!({ "payment_id": payment.id, "amount": payment.amount, "method": payment.method })),
          );
          settled = Some(payment);
        }
      }
      OrderStatus::ReadyToShip => {
        order.fulfillment_status = FulfillmentStatus::Packed;
      }
      OrderStatus::Returned => {
        order.fulfillment_status = FulfillmentStatus::Returned;
      }
      OrderStatus::Refunded => {
        let mut returned = StockReturn {
          released: release_active(tx, self.engine.stock.as_ref(), order, now).await?,
          ..StockReturn::default()
        };
        if order.stock_committed && order.fulfillment_status.is_in_warehouse() {
          returned.restored = restore_committed(tx, order).await?;
        }
        events.extend(stock_events(order.id, &returned, actor));
      }
      _ => {}
    }
    Ok((events, settled))
  }
}
