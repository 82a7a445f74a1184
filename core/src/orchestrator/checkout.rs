// orderflow/src/orchestrator/checkout.rs

//! Gateway checkout sessions for online payment methods.
//!
//! The gateway call happens between two short transactions, never inside one: the first
//! reads and checks the order, the second re-checks it and records the pending payment.

use super::{ensure_visible, load_order, OrderOrchestrator};
use crate::error::{OrderflowError, Result};
use crate::model::{Actor, Order, OrderStatus, Payment, PaymentStatus};
use crate::reconciler::CheckoutSession;
use crate::store::{OrderRepository, PaymentRepository};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

fn ensure_checkout_allowed(order: &Order, payments: &[Payment]) -> Result<()> {
  if !order.payment_method.is_online() {
    return Err(OrderflowError::Validation(format!(
      "{} orders are settled on delivery, not through checkout",
      order.payment_method
    )));
  }
  if order.status != OrderStatus::Pending {
    return Err(OrderflowError::InvalidStateTransition {
      from: order.status,
      to: OrderStatus::Confirmed,
    });
  }
  if order.is_paid() || payments.iter().any(Payment::is_paid) {
    return Err(OrderflowError::Validation(format!("order {} is already paid", order.order_number)));
  }
  Ok(())
}

impl OrderOrchestrator {
  /// Creates (or reuses) a checkout session for a pending online-payment order.
  #[instrument(name = "OrderOrchestrator::create_checkout_session", skip_all, fields(%order_id, %user_id), err(Display))]
  pub async fn create_checkout_session(&self, order_id: Uuid, user_id: Uuid) -> Result<CheckoutSession> {
    let viewer = Actor::Customer(user_id);
    let provider = self.engine.gateway.provider().to_string();

    let (order, items) = {
      let mut tx = self.engine.store.begin().await?;
      let order = load_order(tx.as_mut(), order_id).await?;
      ensure_visible(&order, &viewer)?;
      let payments = tx.payments_for_order(order_id).await?;
      ensure_checkout_allowed(&order, &payments)?;

      let reusable = payments
        .iter()
        .rev()
        .find(|p| p.status == PaymentStatus::Pending && p.provider == provider && p.external_id.is_some());
      if let Some(existing) = reusable {
        let session = CheckoutSession {
          id: existing.external_id.clone().unwrap_or_default(),
          url: existing.checkout_url.clone(),
          transaction_id: existing.transaction_id.clone(),
        };
        tx.rollback().await?;
        info!(session_id = %session.id, "Reusing pending checkout session.");
        return Ok(session);
      }
      let items = tx.order_items(order_id).await?;
      tx.rollback().await?;
      (order, items)
    };

    let session = self.engine.gateway.create_checkout_session(&order, &items).await?;

    let now = Utc::now();
    let mut tx = self.engine.store.begin().await?;
    let mut current = load_order(tx.as_mut(), order_id).await?;
    let payments = tx.payments_for_order(order_id).await?;
    ensure_checkout_allowed(&current, &payments)?;

    let payment = Payment {
      id: Uuid::new_v4(),
      order_id,
      user_id: current.user_id,
      provider,
      method: current.payment_method,
      status: PaymentStatus::Pending,
      amount: current.totals.total,
      currency: current.currency.clone(),
      external_id: Some(session.id.clone()),
      transaction_id: session.transaction_id.clone(),
      checkout_url: session.url.clone(),
      failure_reason: None,
      refund_amount: Decimal::ZERO,
      processed_at: None,
      created_at: now,
      updated_at: now,
    };
    tx.insert_payment(&payment).await?;
    if current.payment_status == PaymentStatus::Failed {
      // A new attempt after a declined one.
      current.payment_status = PaymentStatus::Pending;
      current.updated_at = now;
      tx.update_order(&mut current).await?;
    }
    tx.commit().await?;

    info!(session_id = %session.id, payment_id = %payment.id, "Checkout session created.");
    Ok(session)
  }
}
