// orderflow/src/orchestrator/numbers.rs

//! Human-readable order numbers: `ORD-YYYYMMDD-XXXXXX`.

use crate::error::{OrderflowError, Result};
use crate::model::{Order, OrderItem};
use crate::store::{OrderRepository, StoreTx};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

pub trait OrderNumberGenerator: Send + Sync {
  fn generate(&self, now: DateTime<Utc>) -> String;
}

/// Date prefix plus six random upper-case alphanumerics.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomOrderNumbers;

impl OrderNumberGenerator for RandomOrderNumbers {
  fn generate(&self, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
      .sample_iter(&Alphanumeric)
      .take(6)
      .map(|b| char::from(b).to_ascii_uppercase())
      .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
  }
}

/// Draws numbers until one is free, giving up after `attempts` collisions.
pub async fn allocate_order_number(
  tx: &mut dyn StoreTx,
  generator: &dyn OrderNumberGenerator,
  attempts: u32,
  now: DateTime<Utc>,
) -> Result<String> {
  for attempt in 1..=attempts {
    let candidate = generator.generate(now);
    if !tx.order_number_exists(&candidate).await? {
      return Ok(candidate);
    }
    debug!(attempt, %candidate, "Order number collision; drawing again.");
  }
  Err(OrderflowError::OrderNumberExhausted { attempts })
}

/// Inserts `order`, drawing a new number whenever another transaction claimed the current
/// one between the existence check and the insert.
pub async fn insert_order_with_fresh_number(
  tx: &mut dyn StoreTx,
  generator: &dyn OrderNumberGenerator,
  attempts: u32,
  order: &mut Order,
  items: &[OrderItem],
) -> Result<()> {
  for attempt in 1..=attempts {
    match tx.insert_order(order, items).await {
      Err(OrderflowError::OrderNumberTaken(number)) => {
        debug!(attempt, %number, "Order number claimed concurrently; drawing again.");
        order.order_number = allocate_order_number(tx, generator, attempts, order.created_at).await?;
      }
      other => return other,
    }
  }
  Err(OrderflowError::OrderNumberExhausted { attempts })
}
