// orderflow/src/reservation.rs

//! Order-scoped stock holds on top of the inventory ledger.
//!
//! Every path that ends a reservation (payment, cancellation, the expiry sweep) goes
//! through [`terminate_active`], which flips the row out of `Active` before touching the
//! ledger. A reservation that was already terminated is skipped, so stock is credited or
//! deducted at most once per reservation.

use crate::error::{OrderflowError, Result};
use crate::model::{ReservationStatus, StockReservation};
use crate::store::{InventoryLedger, OrderRepository, ReservationRepository, StoreTx};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// A line the late-payment path could not cover from current stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
  pub product_id: Uuid,
  pub requested: i32,
  pub available: i32,
}

/// The single stock strategy used system-wide.
#[async_trait]
pub trait StockStrategy: Send + Sync {
  async fn can_reserve(&self, tx: &mut dyn StoreTx, product_id: Uuid, qty: i32) -> Result<bool>;

  /// All-or-nothing hold of every `(product_id, qty)` line for `order_id`.
  async fn reserve_for_order(
    &self,
    tx: &mut dyn StoreTx,
    order_id: Uuid,
    items: &[(Uuid, i32)],
    now: DateTime<Utc>,
  ) -> Result<Vec<StockReservation>>;

  /// Turns active holds into on-hand deductions. Returns the reservations confirmed by
  /// this call; an empty result means there was nothing left to confirm.
  async fn confirm_for_order(&self, tx: &mut dyn StoreTx, order_id: Uuid, now: DateTime<Utc>)
    -> Result<Vec<StockReservation>>;

  /// Hands active holds back to available stock. `reason` is `Released` or `Expired`.
  async fn release_for_order(
    &self,
    tx: &mut dyn StoreTx,
    order_id: Uuid,
    reason: ReservationStatus,
    now: DateTime<Utc>,
  ) -> Result<Vec<StockReservation>>;

  /// Expires up to `limit` holds whose deadline passed. Holds of orders locked by another
  /// transaction are left for a later sweep.
  async fn expire_stale(&self, tx: &mut dyn StoreTx, now: DateTime<Utc>, limit: usize) -> Result<Vec<StockReservation>>;

  /// Deducts stock directly for an order whose holds are gone (paid after expiry).
  /// Lines that cannot be covered are reported instead of failing the whole call.
  async fn reacquire_for_order(
    &self,
    tx: &mut dyn StoreTx,
    order_id: Uuid,
    items: &[(Uuid, i32)],
    now: DateTime<Utc>,
  ) -> Result<Vec<Shortfall>>;
}

#[derive(Debug, Clone)]
pub struct StockReservationManager {
  ttl: Duration,
}

impl StockReservationManager {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl }
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }
}

/// Sums duplicate lines and orders them by product id, so concurrent batches take
/// row locks in the same order.
fn merge_lines(items: &[(Uuid, i32)]) -> Result<BTreeMap<Uuid, i32>> {
  let mut merged = BTreeMap::new();
  for &(product_id, qty) in items {
    if qty <= 0 {
      return Err(OrderflowError::Validation(format!(
        "quantity for product {} must be positive",
        product_id
      )));
    }
    *merged.entry(product_id).or_insert(0) += qty;
  }
  Ok(merged)
}

/// Moves a reservation out of `Active` and applies the matching ledger operation.
/// Returns `false` without touching stock when the reservation was already terminated.
pub(crate) async fn terminate_active(
  tx: &mut dyn StoreTx,
  reservation: &StockReservation,
  to: ReservationStatus,
  now: DateTime<Utc>,
) -> Result<bool> {
  if reservation.status.is_terminal() {
    return Ok(false);
  }
  if !tx.terminate_reservation(reservation.id, to, now).await? {
    debug!(reservation_id = %reservation.id, "Reservation already terminated; skipping.");
    return Ok(false);
  }
  match to {
    ReservationStatus::Confirmed => tx.confirm(reservation.product_id, reservation.quantity).await?,
    ReservationStatus::Released | ReservationStatus::Expired => {
      tx.release(reservation.product_id, reservation.quantity).await?
    }
    ReservationStatus::Active => {
      return Err(OrderflowError::Internal("cannot terminate a reservation into 'active'".to_string()));
    }
  };
  Ok(true)
}

#[async_trait]
impl StockStrategy for StockReservationManager {
  async fn can_reserve(&self, tx: &mut dyn StoreTx, product_id: Uuid, qty: i32) -> Result<bool> {
    let level = tx.check_availability(product_id).await?;
    Ok(qty > 0 && level.available() >= qty)
  }

  #[instrument(name = "StockReservationManager::reserve_for_order", skip_all, fields(%order_id, lines = items.len()), err(Display))]
  async fn reserve_for_order(
    &self,
    tx: &mut dyn StoreTx,
    order_id: Uuid,
    items: &[(Uuid, i32)],
    now: DateTime<Utc>,
  ) -> Result<Vec<StockReservation>> {
    let merged = merge_lines(items)?;
    let mut held: Vec<(Uuid, i32)> = Vec::with_capacity(merged.len());

    for (&product_id, &qty) in &merged {
      match tx.reserve(product_id, qty).await {
        Ok(_) => held.push((product_id, qty)),
        Err(err) => {
          // Hand back what this call already took before reporting the failure.
          for &(held_product, held_qty) in held.iter().rev() {
            if let Err(release_err) = tx.release(held_product, held_qty).await {
              warn!(product_id = %held_product, error = %release_err, "Failed to roll back a partial reservation.");
            }
          }
          return Err(err);
        }
      }
    }

    let expires_at = now + self.ttl;
    let reservations: Vec<StockReservation> = held
      .into_iter()
      .map(|(product_id, quantity)| StockReservation {
        id: Uuid::new_v4(),
        order_id,
        product_id,
        quantity,
        status: ReservationStatus::Active,
        expires_at,
        created_at: now,
        terminated_at: None,
      })
      .collect();
    tx.insert_reservations(&reservations).await?;
    debug!(count = reservations.len(), %expires_at, "Stock reserved.");
    Ok(reservations)
  }

  #[instrument(name = "StockReservationManager::confirm_for_order", skip_all, fields(%order_id), err(Display))]
  async fn confirm_for_order(
    &self,
    tx: &mut dyn StoreTx,
    order_id: Uuid,
    now: DateTime<Utc>,
  ) -> Result<Vec<StockReservation>> {
    let mut confirmed = Vec::new();
    for reservation in tx.reservations_for_order(order_id).await? {
      if terminate_active(tx, &reservation, ReservationStatus::Confirmed, now).await? {
        confirmed.push(reservation);
      }
    }
    Ok(confirmed)
  }

  #[instrument(name = "StockReservationManager::release_for_order", skip_all, fields(%order_id, reason = %reason), err(Display))]
  async fn release_for_order(
    &self,
    tx: &mut dyn StoreTx,
    order_id: Uuid,
    reason: ReservationStatus,
    now: DateTime<Utc>,
  ) -> Result<Vec<StockReservation>> {
    if !matches!(reason, ReservationStatus::Released | ReservationStatus::Expired) {
      return Err(OrderflowError::Internal(format!("'{}' is not a release reason", reason)));
    }
    let mut released = Vec::new();
    for reservation in tx.reservations_for_order(order_id).await? {
      if terminate_active(tx, &reservation, reason, now).await? {
        released.push(reservation);
      }
    }
    Ok(released)
  }

  async fn expire_stale(&self, tx: &mut dyn StoreTx, now: DateTime<Utc>, limit: usize) -> Result<Vec<StockReservation>> {
    let candidates = tx.expired_reservations(now, limit).await?;
    let order_ids: Vec<Uuid> = candidates
      .iter()
      .map(|r| r.order_id)
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();
    // Same lock order as cancellation and settlement: order, then reservation, then stock.
    let locked: BTreeSet<Uuid> = tx.lock_orders(&order_ids).await?.into_iter().collect();
    if locked.len() < order_ids.len() {
      debug!(skipped = order_ids.len() - locked.len(), "Orders busy elsewhere; their holds wait for the next sweep.");
    }
    let mut expired = Vec::new();
    for reservation in candidates.into_iter().filter(|r| locked.contains(&r.order_id)) {
      if terminate_active(tx, &reservation, ReservationStatus::Expired, now).await? {
        expired.push(reservation);
      }
    }
    Ok(expired)
  }

  #[instrument(name = "StockReservationManager::reacquire_for_order", skip_all, fields(%order_id), err(Display))]
  async fn reacquire_for_order(
    &self,
    tx: &mut dyn StoreTx,
    order_id: Uuid,
    items: &[(Uuid, i32)],
    now: DateTime<Utc>,
  ) -> Result<Vec<Shortfall>> {
    let mut shortfalls = Vec::new();
    let mut deducted = Vec::new();
    for (&product_id, &qty) in &merge_lines(items)? {
      match tx.reserve(product_id, qty).await {
        Ok(_) => {
          tx.confirm(product_id, qty).await?;
          deducted.push(StockReservation {
            id: Uuid::new_v4(),
            order_id,
            product_id,
            quantity: qty,
            status: ReservationStatus::Confirmed,
            expires_at: now,
            created_at: now,
            terminated_at: Some(now),
          });
        }
        Err(OrderflowError::InsufficientStock { available, .. }) => {
          warn!(%product_id, requested = qty, available, "Late payment could not be covered from stock.");
          shortfalls.push(Shortfall {
            product_id,
            requested: qty,
            available,
          });
        }
        Err(err) => return Err(err),
      }
    }
    tx.insert_reservations(&deducted).await?;
    Ok(shortfalls)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Product;
  use crate::store::{CommerceStore, MemoryStore};
  use rust_decimal::Decimal;

  async fn store_with(on_hand: i32) -> (MemoryStore, Uuid) {
    let store = MemoryStore::new();
    let product = Product {
      id: Uuid::new_v4(),
      name: "Mug".into(),
      sku: "MUG".into(),
      price: Decimal::new(900, 2),
      is_active: true,
    };
    let id = product.id;
    store.seed_product(product, on_hand).await;
    (store, id)
  }

  #[test]
  fn duplicate_lines_are_merged() {
    let p = Uuid::new_v4();
    let merged = merge_lines(&[(p, 1), (p, 2)]).unwrap();
    assert_eq!(merged.get(&p), Some(&3));
    assert!(merge_lines(&[(p, 0)]).is_err());
  }

  #[tokio::test]
  async fn failed_batch_leaves_no_hold_behind() {
    let (store, a) = store_with(5).await;
    let manager = StockReservationManager::new(Duration::minutes(15));
    let missing = Uuid::new_v4();

    let mut tx = store.begin().await.unwrap();
    let err = manager
      .reserve_for_order(tx.as_mut(), Uuid::new_v4(), &[(a, 2), (missing, 1)], Utc::now())
      .await
      .unwrap_err();
    assert!(matches!(err, OrderflowError::ProductUnavailable { .. }) || matches!(err, OrderflowError::InsufficientStock { .. }));
    assert_eq!(tx.check_availability(a).await.unwrap().reserved, 0);
  }

  #[tokio::test]
  async fn confirm_and_release_are_single_shot() {
    let (store, p) = store_with(4).await;
    let manager = StockReservationManager::new(Duration::minutes(15));
    let order_id = Uuid::new_v4();
    let now = Utc::now();

    let mut tx = store.begin().await.unwrap();
    manager.reserve_for_order(tx.as_mut(), order_id, &[(p, 3)], now).await.unwrap();
    assert_eq!(manager.confirm_for_order(tx.as_mut(), order_id, now).await.unwrap().len(), 1);
    assert!(manager.confirm_for_order(tx.as_mut(), order_id, now).await.unwrap().is_empty());
    assert!(manager
      .release_for_order(tx.as_mut(), order_id, ReservationStatus::Released, now)
      .await
      .unwrap()
      .is_empty());
    tx.commit().await.unwrap();

    let level = store.stock_level(p).await.unwrap();
    assert_eq!((level.on_hand, level.reserved), (1, 0));
  }

  #[tokio::test]
  async fn expiry_uses_the_release_path_once() {
    let (store, p) = store_with(2).await;
    let manager = StockReservationManager::new(Duration::minutes(1));
    let order_id = Uuid::new_v4();
    let then = Utc::now() - Duration::minutes(5);

    let mut tx = store.begin().await.unwrap();
    manager.reserve_for_order(tx.as_mut(), order_id, &[(p, 2)], then).await.unwrap();
    assert_eq!(manager.expire_stale(tx.as_mut(), Utc::now(), 10).await.unwrap().len(), 1);
    assert!(manager.expire_stale(tx.as_mut(), Utc::now(), 10).await.unwrap().is_empty());
    assert!(manager
      .release_for_order(tx.as_mut(), order_id, ReservationStatus::Released, Utc::now())
      .await
      .unwrap()
      .is_empty());
    assert_eq!(tx.check_availability(p).await.unwrap().available(), 2);
  }

  #[tokio::test]
  async fn reacquire_reports_shortfall_without_failing() {
    let (store, p) = store_with(1).await;
    let manager = StockReservationManager::new(Duration::minutes(15));

    let mut tx = store.begin().await.unwrap();
    let shortfalls = manager
      .reacquire_for_order(tx.as_mut(), Uuid::new_v4(), &[(p, 3)], Utc::now())
      .await
      .unwrap();
    assert_eq!(
      shortfalls,
      vec![Shortfall {
        product_id: p,
        requested: 3,
        available: 1
      }]
    );
    assert_eq!(tx.check_availability(p).await.unwrap().on_hand, 1);
  }
}
