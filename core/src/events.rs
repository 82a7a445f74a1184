// orderflow/src/events.rs

//! Best-effort order timeline.

use crate::error::Result;
use crate::model::{NewOrderEvent, OrderEvent};
use crate::store::EventStore;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct OrderEventLog {
  store: Arc<dyn EventStore>,
}

impl OrderEventLog {
  pub fn new(store: Arc<dyn EventStore>) -> Self {
    Self { store }
  }

  /// Appends one event. Failures are logged and swallowed: the timeline must never
  /// decide the outcome of an order mutation.
  pub async fn record(&self, event: NewOrderEvent) -> Option<OrderEvent> {
    let order_id = event.order_id;
    let event_type = event.event_type;
    match self.try_record(event).await {
      Ok(stored) => {
        debug!(%order_id, event_type = %event_type, sequence = stored.sequence, "Order event recorded.");
        Some(stored)
      }
      Err(err) => {
        warn!(%order_id, event_type = %event_type, error = %err, "Failed to record order event.");
        None
      }
    }
  }

  /// Appends one event and reports failure. Only for callers whose whole purpose is the
  /// event itself, such as adding a note.
  pub async fn try_record(&self, event: NewOrderEvent) -> Result<OrderEvent> {
    self.store.append(event).await
  }

  /// Records a batch in order, e.g. the events collected during one transaction.
  pub async fn record_all(&self, events: Vec<NewOrderEvent>) -> usize {
    let mut written = 0;
    for event in events {
      if self.record(event).await.is_some() {
        written += 1;
      }
    }
    written
  }

  /// Timeline in creation order. Unlike writes, read failures are reported.
  pub async fn events(&self, order_id: Uuid, public_only: bool) -> Result<Vec<OrderEvent>> {
    let mut events = self.store.events_for_order(order_id, public_only).await?;
    events.sort_by_key(|e| e.sequence);
    Ok(events)
  }
}
