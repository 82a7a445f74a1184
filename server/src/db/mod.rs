// orderflow_server/src/db/mod.rs

//! PostgreSQL backend for the engine's storage traits.
//!
//! Stock primitives are single conditional `UPDATE ... RETURNING` statements, rows the
//! engine decides on are read `FOR UPDATE`, and order writes compare-and-swap on
//! `version`. Dropping a [`PgTx`] rolls the transaction back.

mod events;
mod orders;
mod rows;

pub use events::PgEventStore;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow::model::{Cart, CartItem, Product, ReservationStatus, StockLevel, StockReservation};
use orderflow::store::{CartRepository, InventoryLedger, ProductCatalog, ReservationRepository};
use orderflow::{CommerceStore, OrderflowError, Result, StoreTx};
use rows::{convert_all, ReservationRow, RESERVATION_COLUMNS};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

pub(crate) fn db(err: sqlx::Error) -> OrderflowError {
  OrderflowError::storage(err)
}

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub async fn migrate(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(&self.pool).await
  }
}

#[async_trait]
impl CommerceStore for PgStore {
  async fn begin(&self) -> Result<Box<dyn StoreTx>> {
    let tx = self.pool.begin().await.map_err(db)?;
    Ok(Box::new(PgTx { tx }))
  }
}

pub struct PgTx {
  tx: Transaction<'static, Postgres>,
}

fn positive(qty: i32) -> Result<()> {
  if qty <= 0 {
    return Err(OrderflowError::Validation(format!("quantity must be positive, got {}", qty)));
  }
  Ok(())
}

fn level((product_id, on_hand, reserved): (Uuid, i32, i32)) -> StockLevel {
  StockLevel {
    product_id,
    on_hand,
    reserved,
  }
}

#[async_trait]
impl InventoryLedger for PgTx {
  async fn check_availability(&mut self, product_id: Uuid) -> Result<StockLevel> {
    let row: Option<(Uuid, i32, i32)> =
      sqlx::query_as("SELECT product_id, on_hand, reserved FROM inventory WHERE product_id = $1")
        .bind(product_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db)?;
    row.map(level).ok_or(OrderflowError::ProductUnavailable { product_id })
  }

  #[instrument(level = "debug", skip(self))]
  async fn reserve(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel> {
    positive(qty)?;
    let row: Option<(Uuid, i32, i32)> = sqlx::query_as(
      "UPDATE inventory SET reserved = reserved + $2, updated_at = NOW()
       WHERE product_id = $1 AND on_hand - reserved >= $2
       RETURNING product_id, on_hand, reserved",
    )
    .bind(product_id)
    .bind(qty)
    .fetch_optional(&mut *self.tx)
    .await
    .map_err(db)?;
    match row {
      Some(row) => Ok(level(row)),
      None => {
        let current = self.check_availability(product_id).await?;
        Err(OrderflowError::InsufficientStock {
          product_id,
          requested: qty,
          available: current.available(),
        })
      }
    }
  }

  #[instrument(level = "debug", skip(self))]
  async fn confirm(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel> {
    positive(qty)?;
    let row: Option<(Uuid, i32, i32)> = sqlx::query_as(
      "UPDATE inventory SET reserved = reserved - $2, on_hand = on_hand - $2, updated_at = NOW()
       WHERE product_id = $1 AND reserved >= $2 AND on_hand >= $2
       RETURNING product_id, on_hand, reserved",
    )
    .bind(product_id)
    .bind(qty)
    .fetch_optional(&mut *self.tx)
    .await
    .map_err(db)?;
    match row {
      Some(row) => Ok(level(row)),
      None => {
        let current = self.check_availability(product_id).await?;
        Err(OrderflowError::storage(anyhow!(
          "cannot confirm {} units of {}: reserved {}, on hand {}",
          qty,
          product_id,
          current.reserved,
          current.on_hand
        )))
      }
    }
  }

  #[instrument(level = "debug", skip(self))]
  async fn release(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel> {
    positive(qty)?;
    let row: Option<(Uuid, i32, i32)> = sqlx::query_as(
      "UPDATE inventory SET reserved = reserved - $2, updated_at = NOW()
       WHERE product_id = $1 AND reserved >= $2
       RETURNING product_id, on_hand, reserved",
    )
    .bind(product_id)
    .bind(qty)
    .fetch_optional(&mut *self.tx)
    .await
    .map_err(db)?;
    match row {
      Some(row) => Ok(level(row)),
      None => {
        let current = self.check_availability(product_id).await?;
        Err(OrderflowError::storage(anyhow!(
          "cannot release {} units of {}: only {} reserved",
          qty,
          product_id,
          current.reserved
        )))
      }
    }
  }

  #[instrument(level = "debug", skip(self))]
  async fn restore(&mut self, product_id: Uuid, qty: i32) -> Result<StockLevel> {
    positive(qty)?;
    let row: Option<(Uuid, i32, i32)> = sqlx::query_as(
      "UPDATE inventory SET on_hand = on_hand + $2, updated_at = NOW()
       WHERE product_id = $1
       RETURNING product_id, on_hand, reserved",
    )
    .bind(product_id)
    .bind(qty)
    .fetch_optional(&mut *self.tx)
    .await
    .map_err(db)?;
    row.map(level).ok_or(OrderflowError::ProductUnavailable { product_id })
  }
}

#[async_trait]
impl ReservationRepository for PgTx {
  async fn insert_reservations(&mut self, reservations: &[StockReservation]) -> Result<()> {
    if reservations.is_empty() {
      return Ok(());
    }
    let mut insert = QueryBuilder::<Postgres>::new(
      "INSERT INTO stock_reservations (id, order_id, product_id, quantity, status, expires_at, created_at, terminated_at) ",
    );
    insert.push_values(reservations, |mut row, r| {
      row
        .push_bind(r.id)
        .push_bind(r.order_id)
        .push_bind(r.product_id)
        .push_bind(r.quantity)
        .push_bind(r.status.as_str())
        .push_bind(r.expires_at)
        .push_bind(r.created_at)
        .push_bind(r.terminated_at);
    });
    insert.build().execute(&mut *self.tx).await.map_err(db)?;
    Ok(())
  }

  async fn reservations_for_order(&mut self, order_id: Uuid) -> Result<Vec<StockReservation>> {
    let rows: Vec<ReservationRow> = sqlx::query_as(&format!(
      "SELECT {} FROM stock_reservations WHERE order_id = $1 ORDER BY created_at, id",
      RESERVATION_COLUMNS
    ))
    .bind(order_id)
    .fetch_all(&mut *self.tx)
    .await
    .map_err(db)?;
    convert_all(rows)
  }

  async fn terminate_reservation(
    &mut self,
    reservation_id: Uuid,
    to: ReservationStatus,
    at: DateTime<Utc>,
  ) -> Result<bool> {
    let done = sqlx::query(
      "UPDATE stock_reservations SET status = $2, terminated_at = $3
       WHERE id = $1 AND status = 'active'",
    )
    .bind(reservation_id)
    .bind(to.as_str())
    .bind(at)
    .execute(&mut *self.tx)
    .await
    .map_err(db)?;
    if done.rows_affected() == 1 {
      return Ok(true);
    }
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM stock_reservations WHERE id = $1)")
      .bind(reservation_id)
      .fetch_one(&mut *self.tx)
      .await
      .map_err(db)?;
    if exists {
      Ok(false)
    } else {
      Err(OrderflowError::storage(anyhow!("reservation {} not found", reservation_id)))
    }
  }

  async fn expired_reservations(&mut self, now: DateTime<Utc>, limit: usize) -> Result<Vec<StockReservation>> {
    // Plain read: order rows are locked before any reservation row, on every path.
    let rows: Vec<ReservationRow> = sqlx::query_as(&format!(
      "SELECT {} FROM stock_reservations
       WHERE status = 'active' AND expires_at <= $1
       ORDER BY created_at, id
       LIMIT $2",
      RESERVATION_COLUMNS
    ))
    .bind(now)
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(&mut *self.tx)
    .await
    .map_err(db)?;
    convert_all(rows)
  }
}

#[async_trait]
impl CartRepository for PgTx {
  async fn active_cart(&mut self, user_id: Uuid) -> Result<Option<Cart>> {
    let cart: Option<(Uuid, Uuid)> = sqlx::query_as(
      "SELECT id, user_id FROM carts WHERE user_id = $1 AND converted_order_id IS NULL FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *self.tx)
    .await
    .map_err(db)?;
    let Some((id, user_id)) = cart else {
      return Ok(None);
    };
    let items: Vec<(Uuid, i32)> =
      sqlx::query_as("SELECT product_id, quantity FROM cart_items WHERE cart_id = $1 ORDER BY added_at, product_id")
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db)?;
    Ok(Some(Cart {
      id,
      user_id,
      items: items
        .into_iter()
        .map(|(product_id, quantity)| CartItem { product_id, quantity })
        .collect(),
      converted_order_id: None,
    }))
  }

  async fn convert_cart(&mut self, cart_id: Uuid, order_id: Uuid) -> Result<()> {
    let done = sqlx::query("UPDATE carts SET converted_order_id = $2, updated_at = NOW() WHERE id = $1")
      .bind(cart_id)
      .bind(order_id)
      .execute(&mut *self.tx)
      .await
      .map_err(db)?;
    if done.rows_affected() == 0 {
      return Err(OrderflowError::storage(anyhow!("cart {} not found", cart_id)));
    }
    sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
      .bind(cart_id)
      .execute(&mut *self.tx)
      .await
      .map_err(db)?;
    debug!(%cart_id, %order_id, "Cart converted.");
    Ok(())
  }
}

#[async_trait]
impl ProductCatalog for PgTx {
  async fn products_by_ids(&mut self, ids: &[Uuid]) -> Result<Vec<Product>> {
    let rows: Vec<(Uuid, String, String, Decimal, bool)> =
      sqlx::query_as("SELECT id, name, sku, price, is_active FROM products WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db)?;
    let mut by_id: HashMap<Uuid, Product> = rows
      .into_iter()
      .map(|(id, name, sku, price, is_active)| {
        (
          id,
          Product {
            id,
            name,
            sku,
            price,
            is_active,
          },
        )
      })
      .collect();
    // Keep the caller's order.
    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
  }
}

#[async_trait]
impl StoreTx for PgTx {
  async fn commit(self: Box<Self>) -> Result<()> {
    self.tx.commit().await.map_err(db)?;
    debug!("Postgres transaction committed.");
    Ok(())
  }

  async fn rollback(self: Box<Self>) -> Result<()> {
    self.tx.rollback().await.map_err(db)?;
    debug!("Postgres transaction rolled back.");
    Ok(())
  }
}
