// orderflow/src/reconciler/settle.rs

//! The one state machine both the webhook path and the fallback confirmation path
//! converge on. Every entry point re-reads the payment inside its transaction and treats
//! "already in the target state" as success.

use super::ReconcileOutcome;
use crate::engine::Engine;
use crate::error::{OrderflowError, Result};
use crate::model::{
  Actor, NewOrderEvent, Order, OrderEventType, OrderStatus, Payment, PaymentMethod, PaymentStatus,
};
use crate::orchestrator::{
  commit_order_stock, load_order, release_active, restore_committed, status_event, stock_events, StockReturn,
};
use crate::store::{OrderRepository, PaymentRepository, StoreTx};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, instrument, warn};

/// Marks the awaiting cash-on-delivery payment of `order` as collected.
pub(crate) async fn settle_cash_on_delivery(
  tx: &mut dyn StoreTx,
  order: &mut Order,
  now: DateTime<Utc>,
) -> Result<Option<Payment>> {
  if order.payment_method != PaymentMethod::CashOnDelivery || order.is_paid() {
    return Ok(None);
  }
  let awaiting = tx
    .payments_for_order(order.id)
    .await?
    .into_iter()
    .find(|p| p.status == PaymentStatus::AwaitingPayment);
  let Some(mut payment) = awaiting else {
    warn!(order_id = %order.id, "Cash-on-delivery order delivered without an awaiting payment.");
    return Ok(None);
  };
  payment.status = PaymentStatus::Paid;
  payment.processed_at = Some(now);
  payment.updated_at = now;
  tx.update_payment(&payment).await?;
  order.payment_status = PaymentStatus::Paid;
  Ok(Some(payment))
}

async fn find_payment(tx: &mut dyn StoreTx, reference: &str) -> Result<Payment> {
  tx.find_payment_by_reference(reference)
    .await?
    .ok_or_else(|| OrderflowError::PaymentNotFound(reference.to_string()))
}

#[derive(Clone)]
pub struct Settlement {
  engine: Engine,
}

impl Settlement {
  pub fn new(engine: Engine) -> Self {
    Self { engine }
  }

  /// Payment captured: mark it paid, confirm the order, commit its stock.
  #[instrument(name = "Settlement::apply_success", skip_all, fields(%reference, actor = %actor), err(Display))]
  pub async fn apply_success(
    &self,
    reference: &str,
    payment_intent: Option<String>,
    actor: &Actor,
  ) -> Result<ReconcileOutcome> {
    let now = Utc::now();
    let mut tx = self.engine.store.begin().await?;
    let mut payment = find_payment(tx.as_mut(), reference).await?;
    if payment.is_paid() {
      tx.rollback().await?;
      info!(payment_id = %payment.id, "Payment already settled; nothing to do.");
      return Ok(ReconcileOutcome::AlreadyProcessed);
    }

    payment.status = PaymentStatus::Paid;
    payment.processed_at = Some(now);
    payment.failure_reason = None;
    payment.updated_at = now;
    if payment.transaction_id.is_none() {
      payment.transaction_id = payment_intent;
    }
    tx.update_payment(&payment).await?;

    let mut order = load_order(tx.as_mut(), payment.order_id).await?;
    order.payment_status = PaymentStatus::Paid;
    order.updated_at = now;

    let mut events = vec![NewOrderEvent::new(order.id, OrderEventType::PaymentReceived, actor.clone())
      .with_payload(json!({ "payment_id": payment.id, "amount": payment.amount, "currency": payment.currency }))];
    let mut from = None;

    if order.status.is_terminal() {
      // Money arrived for an order that can no longer be fulfilled.
      warn!(order_id = %order.id, status = %order.status, "Payment settled for a closed order; refund required.");
      events.push(
        NewOrderEvent::new(order.id, OrderEventType::RefundRequired, actor.clone())
          .with_payload(json!({ "payment_id": payment.id, "amount": payment.amount, "reason": "order_closed" })),
      );
    } else {
      if order.status == OrderStatus::Pending {
        let previous = order.transition_to(OrderStatus::Confirmed, now)?;
        events.push(status_event(&order, previous, actor));
        from = Some(previous);
      }
      events.extend(commit_order_stock(tx.as_mut(), self.engine.stock.as_ref(), &mut order, actor, now).await?);
    }

    tx.update_order(&mut order).await?;
    tx.commit().await?;

    self.engine.events.record_all(events).await;
    self.engine.notifications.notify_payment_received(&order, payment.amount);
    if let Some(previous) = from {
      self.engine.notifications.notify_order_status_changed(&order, previous);
    }
    info!(order_id = %order.id, payment_id = %payment.id, "Payment settled.");
    Ok(ReconcileOutcome::Applied)
  }

  /// Payment declined: mark it failed and hand the order's held stock back.
  #[instrument(name = "Settlement::apply_failure", skip_all, fields(%reference, actor = %actor), err(Display))]
  pub async fn apply_failure(&self, reference: &str, reason: &str, actor: &Actor) -> Result<ReconcileOutcome> {
    let now = Utc::now();
    let mut tx = self.engine.store.begin().await?;
    let mut payment = find_payment(tx.as_mut(), reference).await?;
    if payment.status == PaymentStatus::Failed || payment.is_paid() {
      tx.rollback().await?;
      info!(payment_id = %payment.id, status = %payment.status, "Failure notice for a finished payment; ignoring.");
      return Ok(ReconcileOutcome::AlreadyProcessed);
    }

    payment.status = PaymentStatus::Failed;
    payment.failure_reason = Some(reason.to_string());
    payment.updated_at = now;
    tx.update_payment(&payment).await?;

    let mut order = load_order(tx.as_mut(), payment.order_id).await?;
    let mut returned = StockReturn::default();
    if order.status == OrderStatus::Pending && !order.is_paid() {
      returned.released = release_active(tx.as_mut(), self.engine.stock.as_ref(), &mut order, now).await?;
      order.payment_status = PaymentStatus::Failed;
      order.updated_at = now;
      tx.update_order(&mut order).await?;
    }
    tx.commit().await?;

    let mut events = vec![NewOrderEvent::new(order.id, OrderEventType::PaymentFailed, actor.clone())
      .with_payload(json!({ "payment_id": payment.id, "reason": reason }))];
    events.extend(stock_events(order.id, &returned, actor));
    self.engine.events.record_all(events).await;
    self.engine.notifications.notify_payment_failed(&order, reason);
    info!(order_id = %order.id, payment_id = %payment.id, released = returned.released.len(), "Payment failure recorded.");
    Ok(ReconcileOutcome::Applied)
  }

  /// Refund reported by the gateway. `amount_refunded` is cumulative, so replays and
  /// out-of-order deliveries of older refunds are no-ops.
  #[instrument(name = "Settlement::apply_refund", skip_all, fields(%reference, %amount_refunded), err(Display))]
  pub async fn apply_refund(&self, reference: &str, amount_refunded: Decimal, actor: &Actor) -> Result<ReconcileOutcome> {
    let now = Utc::now();
    let mut tx = self.engine.store.begin().await?;
    let mut payment = find_payment(tx.as_mut(), reference).await?;
    if !payment.is_paid() {
      tx.rollback().await?;
      warn!(payment_id = %payment.id, status = %payment.status, "Refund for a payment that was never settled; ignoring.");
      return Ok(ReconcileOutcome::Ignored);
    }
    if amount_refunded <= payment.refund_amount {
      tx.rollback().await?;
      return Ok(ReconcileOutcome::AlreadyProcessed);
    }
    if amount_refunded > payment.amount {
      return Err(OrderflowError::Validation(format!(
        "refund {} exceeds payment amount {}",
        amount_refunded, payment.amount
      )));
    }

    let full = amount_refunded == payment.amount;
    payment.refund_amount = amount_refunded;
    payment.status = if full {
      PaymentStatus::Refunded
    } else {
      PaymentStatus::PartiallyRefunded
    };
    payment.updated_at = now;
    tx.update_payment(&payment).await?;

    let mut order = load_order(tx.as_mut(), payment.order_id).await?;
    order.payment_status = payment.status;
    order.updated_at = now;
    let mut returned = StockReturn::default();
    let mut from = None;
    if full && order.status.can_transition_to(OrderStatus::Refunded) {
      from = Some(order.transition_to(OrderStatus::Refunded, now)?);
      returned.released = release_active(tx.as_mut(), self.engine.stock.as_ref(), &mut order, now).await?;
      if order.stock_committed && order.fulfillment_status.is_in_warehouse() {
        returned.restored = restore_committed(tx.as_mut(), &mut order).await?;
      }
    }
    tx.update_order(&mut order).await?;
    tx.commit().await?;

    let mut events = vec![NewOrderEvent::new(order.id, OrderEventType::Refunded, actor.clone()).with_payload(json!({
      "payment_id": payment.id,
      "amount_refunded": amount_refunded,
      "full": full,
      "from": from,
    }))];
    events.extend(stock_events(order.id, &returned, actor));
    self.engine.events.record_all(events).await;
    if let Some(previous) = from {
      self.engine.notifications.notify_order_status_changed(&order, previous);
    }
    info!(order_id = %order.id, full, "Refund recorded.");
    Ok(ReconcileOutcome::Applied)
  }
}
