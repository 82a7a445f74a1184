// orderflow/src/notify.rs

//! Fire-and-forget customer notifications.
//!
//! Callers enqueue through [`NotificationDispatcher`], which never blocks: a full or
//! closed queue drops the notification with a warning. A single [`NotificationWorker`]
//! drains the queue and retries each delivery a bounded number of times.

use crate::config::OrderflowConfig;
use crate::model::{Order, OrderStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
  OrderCreated {
    order_id: Uuid,
    order_number: String,
    user_id: Uuid,
    total: Decimal,
    currency: String,
  },
  OrderStatusChanged {
    order_id: Uuid,
    order_number: String,
    user_id: Uuid,
    from: OrderStatus,
    to: OrderStatus,
  },
  PaymentReceived {
    order_id: Uuid,
    order_number: String,
    user_id: Uuid,
    amount: Decimal,
    currency: String,
  },
  PaymentFailed {
    order_id: Uuid,
    order_number: String,
    user_id: Uuid,
    reason: String,
  },
  OrderCancelled {
    order_id: Uuid,
    order_number: String,
    user_id: Uuid,
    reason: Option<String>,
  },
}

impl Notification {
  pub fn kind(&self) -> &'static str {
    match self {
      Notification::OrderCreated { .. } => "order_created",
      Notification::OrderStatusChanged { .. } => "order_status_changed",
      Notification::PaymentReceived { .. } => "payment_received",
      Notification::PaymentFailed { .. } => "payment_failed",
      Notification::OrderCancelled { .. } => "order_cancelled",
    }
  }

  pub fn order_id(&self) -> Uuid {
    match self {
      Notification::OrderCreated { order_id, .. }
      | Notification::OrderStatusChanged { order_id, .. }
      | Notification::PaymentReceived { order_id, .. }
      | Notification::PaymentFailed { order_id, .. }
      | Notification::OrderCancelled { order_id, .. } => *order_id,
    }
  }
}

/// Delivery channel (e-mail, SMS, push...). Implemented outside the engine.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct NotificationDispatcher {
  sender: mpsc::Sender<Notification>,
}

impl NotificationDispatcher {
  /// Creates the dispatcher and the receiving end to hand to a [`NotificationWorker`].
  pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (Self { sender }, receiver)
  }

  /// Enqueues without waiting. Returns whether the notification was accepted.
  pub fn dispatch(&self, notification: Notification) -> bool {
    let kind = notification.kind();
    let order_id = notification.order_id();
    match self.sender.try_send(notification) {
      Ok(()) => {
        debug!(kind, %order_id, "Notification queued.");
        true
      }
      Err(mpsc::error::TrySendError::Full(_)) => {
        warn!(kind, %order_id, "Notification queue full; dropping notification.");
        false
      }
      Err(mpsc::error::TrySendError::Closed(_)) => {
        warn!(kind, %order_id, "Notification worker stopped; dropping notification.");
        false
      }
    }
  }

  pub fn notify_order_created(&self, order: &Order) -> bool {
    self.dispatch(Notification::OrderCreated {
      order_id: order.id,
      order_number: order.order_number.clone(),
      user_id: order.user_id,
      total: order.totals.total,
      currency: order.currency.clone(),
    })
  }

  /// Only customer-visible statuses produce a notification.
  pub fn notify_order_status_changed(&self, order: &Order, from: OrderStatus) -> bool {
    if !order.status.is_customer_visible() {
      return false;
    }
    self.dispatch(Notification::OrderStatusChanged {
      order_id: order.id,
      order_number: order.order_number.clone(),
      user_id: order.user_id,
      from,
      to: order.status,
    })
  }

  pub fn notify_payment_received(&self, order: &Order, amount: Decimal) -> bool {
    self.dispatch(Notification::PaymentReceived {
      order_id: order.id,
      order_number: order.order_number.clone(),
      user_id: order.user_id,
      amount,
      currency: order.currency.clone(),
    })
  }

  pub fn notify_payment_failed(&self, order: &Order, reason: &str) -> bool {
    self.dispatch(Notification::PaymentFailed {
      order_id: order.id,
      order_number: order.order_number.clone(),
      user_id: order.user_id,
      reason: reason.to_string(),
    })
  }

  pub fn notify_order_cancelled(&self, order: &Order) -> bool {
    self.dispatch(Notification::OrderCancelled {
      order_id: order.id,
      order_number: order.order_number.clone(),
      user_id: order.user_id,
      reason: order.cancellation_reason.clone(),
    })
  }
}

pub struct NotificationWorker {
  receiver: mpsc::Receiver<Notification>,
  notifier: Arc<dyn Notifier>,
  max_attempts: u32,
  backoff: Duration,
}

impl NotificationWorker {
  pub fn new(receiver: mpsc::Receiver<Notification>, notifier: Arc<dyn Notifier>, config: &OrderflowConfig) -> Self {
    Self {
      receiver,
      notifier,
      max_attempts: config.notification_max_attempts.max(1),
      backoff: config.notification_retry_backoff,
    }
  }

  pub fn spawn(self) -> JoinHandle<()> {
    tokio::spawn(self.run())
  }

  /// Drains the queue until every dispatcher has been dropped.
  pub async fn run(mut self) {
    info!("Notification worker started.");
    while let Some(notification) = self.receiver.recv().await {
      self.deliver_with_retry(&notification).await;
    }
    info!("Notification worker stopped: all dispatchers dropped.");
  }

  async fn deliver_with_retry(&self, notification: &Notification) {
    let kind = notification.kind();
    let order_id = notification.order_id();
    for attempt in 1..=self.max_attempts {
      match self.notifier.deliver(notification).await {
        Ok(()) => {
          debug!(kind, %order_id, attempt, "Notification delivered.");
          return;
        }
        Err(err) if attempt < self.max_attempts => {
          warn!(kind, %order_id, attempt, error = %err, "Notification delivery failed; retrying.");
          tokio::time::sleep(self.backoff * attempt).await;
        }
        Err(err) => {
          error!(kind, %order_id, attempt, error = %err, "Notification delivery failed; giving up.");
        }
      }
    }
  }
}
