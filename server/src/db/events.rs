// orderflow_server/src/db/events.rs

use super::db;
use super::rows::{convert_all, EventRow};
use async_trait::async_trait;
use orderflow::model::{NewOrderEvent, OrderEvent};
use orderflow::{EventStore, Result};
use sqlx::PgPool;
use uuid::Uuid;

/// Order timeline in its own table, written on the pool outside any order transaction.
#[derive(Clone)]
pub struct PgEventStore {
  pool: PgPool,
}

impl PgEventStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl EventStore for PgEventStore {
  async fn append(&self, event: NewOrderEvent) -> Result<OrderEvent> {
    let row: EventRow = sqlx::query_as(
      "INSERT INTO order_events (id, order_id, event_type, payload, actor, is_public)
       VALUES ($1, $2, $3, $4, $5, $6)
       RETURNING id, sequence, order_id, event_type, payload, actor, is_public, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(event.order_id)
    .bind(event.event_type.as_str())
    .bind(&event.payload)
    .bind(event.actor.to_string())
    .bind(event.is_public)
    .fetch_one(&self.pool)
    .await
    .map_err(db)?;
    OrderEvent::try_from(row)
  }

  async fn events_for_order(&self, order_id: Uuid, public_only: bool) -> Result<Vec<OrderEvent>> {
    let rows: Vec<EventRow> = sqlx::query_as(
      "SELECT id, sequence, order_id, event_type, payload, actor, is_public, created_at
       FROM order_events
       WHERE order_id = $1 AND (NOT $2 OR is_public)
       ORDER BY sequence",
    )
    .bind(order_id)
    .bind(public_only)
    .fetch_all(&self.pool)
    .await
    .map_err(db)?;
    convert_all(rows)
  }
}
