// orderflow_server/src/db/orders.rs

use super::rows::{convert_all, OrderItemRow, OrderRow, PaymentRow, ORDER_COLUMNS, PAYMENT_COLUMNS};
use super::{db, PgTx};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow::model::{Order, OrderFilter, OrderItem, Payment};
use orderflow::store::{OrderRepository, PaymentRepository};
use orderflow::{OrderflowError, Result};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

const ORDER_NUMBER_CONSTRAINT: &str = "orders_order_number_key";

#[async_trait]
impl OrderRepository for PgTx {
  #[instrument(level = "debug", skip_all, fields(order_id = %order.id, order_number = %order.order_number))]
  async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<()> {
    // A unique violation aborts the transaction unless it is confined to a savepoint.
    sqlx::query("SAVEPOINT insert_order").execute(&mut *self.tx).await.map_err(db)?;
    let inserted = sqlx::query(
      "INSERT INTO orders (id, order_number, user_id, status, payment_status, fulfillment_status, payment_method,
         subtotal, tax, shipping, discount, total, currency, shipping_address, billing_address, customer_note,
         has_active_reservation, stock_committed, reservation_expires_at, payment_due_at, carrier, tracking_number,
         estimated_delivery, shipped_at, delivered_at, cancelled_at, cancellation_reason, version, created_at, updated_at)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22,
         $23, $24, $25, $26, $27, $28, $29, $30)",
    )
    .bind(order.id)
    .bind(&order.order_number)
    .bind(order.user_id)
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(order.fulfillment_status.as_str())
    .bind(order.payment_method.as_str())
    .bind(order.totals.subtotal)
    .bind(order.totals.tax)
    .bind(order.totals.shipping)
    .bind(order.totals.discount)
    .bind(order.totals.total)
    .bind(&order.currency)
    .bind(Json(&order.shipping_address))
    .bind(Json(&order.billing_address))
    .bind(&order.customer_note)
    .bind(order.has_active_reservation)
    .bind(order.stock_committed)
    .bind(order.reservation_expires_at)
    .bind(order.payment_due_at)
    .bind(&order.carrier)
    .bind(&order.tracking_number)
    .bind(order.estimated_delivery)
    .bind(order.shipped_at)
    .bind(order.delivered_at)
    .bind(order.cancelled_at)
    .bind(&order.cancellation_reason)
    .bind(order.version)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *self.tx)
    .await;
    match inserted {
      Ok(_) => {
        sqlx::query("RELEASE SAVEPOINT insert_order").execute(&mut *self.tx).await.map_err(db)?;
      }
      Err(sqlx::Error::Database(err)) if err.constraint() == Some(ORDER_NUMBER_CONSTRAINT) => {
        sqlx::query("ROLLBACK TO SAVEPOINT insert_order").execute(&mut *self.tx).await.map_err(db)?;
        return Err(OrderflowError::OrderNumberTaken(order.order_number.clone()));
      }
      Err(err) => return Err(db(err)),
    }

    if !items.is_empty() {
      let mut insert = QueryBuilder::<Postgres>::new(
        "INSERT INTO order_items (id, order_id, line_no, product_id, product_name, sku, unit_price, quantity, line_total) ",
      );
      insert.push_values(items.iter().enumerate(), |mut row, (line_no, item)| {
        row
          .push_bind(item.id)
          .push_bind(item.order_id)
          .push_bind(line_no as i32)
          .push_bind(item.product_id)
          .push_bind(item.product_name.clone())
          .push_bind(item.sku.clone())
          .push_bind(item.unit_price)
          .push_bind(item.quantity)
          .push_bind(item.line_total);
      });
      insert.build().execute(&mut *self.tx).await.map_err(db)?;
    }
    Ok(())
  }

  async fn order_number_exists(&mut self, order_number: &str) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM orders WHERE order_number = $1)")
      .bind(order_number)
      .fetch_one(&mut *self.tx)
      .await
      .map_err(db)?;
    Ok(exists)
  }

  async fn find_order(&mut self, order_id: Uuid) -> Result<Option<Order>> {
    let row: Option<OrderRow> = sqlx::query_as(&format!("SELECT {} FROM orders WHERE id = $1 FOR UPDATE", ORDER_COLUMNS))
      .bind(order_id)
      .fetch_optional(&mut *self.tx)
      .await
      .map_err(db)?;
    row.map(Order::try_from).transpose()
  }

  async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>> {
    let rows: Vec<OrderItemRow> = sqlx::query_as(
      "SELECT id, order_id, product_id, product_name, sku, unit_price, quantity, line_total
       FROM order_items WHERE order_id = $1 ORDER BY line_no",
    )
    .bind(order_id)
    .fetch_all(&mut *self.tx)
    .await
    .map_err(db)?;
    Ok(rows.into_iter().map(OrderItem::from).collect())
  }

  async fn list_orders(&mut self, filter: &OrderFilter) -> Result<Vec<Order>> {
    let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM orders WHERE TRUE", ORDER_COLUMNS));
    if let Some(user_id) = filter.user_id {
      query.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(status) = filter.status {
      query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(payment_status) = filter.payment_status {
      query.push(" AND payment_status = ").push_bind(payment_status.as_str());
    }
    if let Some(from) = filter.created_from {
      query.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
      query.push(" AND created_at < ").push_bind(to);
    }
    query
      .push(" ORDER BY created_at DESC, id DESC LIMIT ")
      .push_bind(i64::from(filter.effective_limit()))
      .push(" OFFSET ")
      .push_bind(i64::from(filter.offset.unwrap_or(0)));

    let rows = query
      .build_query_as::<OrderRow>()
      .fetch_all(&mut *self.tx)
      .await
      .map_err(db)?;
    convert_all(rows)
  }

  async fn lock_orders(&mut self, order_ids: &[Uuid]) -> Result<Vec<Uuid>> {
    if order_ids.is_empty() {
      return Ok(Vec::new());
    }
    // Concurrent sweepers split the backlog instead of queueing on each other.
    let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE id = ANY($1) ORDER BY id FOR UPDATE SKIP LOCKED")
      .bind(order_ids)
      .fetch_all(&mut *self.tx)
      .await
      .map_err(db)?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
  }

  async fn overdue_orders(&mut self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>> {
    let rows: Vec<OrderRow> = sqlx::query_as(&format!(
      "SELECT {} FROM orders
       WHERE status = 'pending' AND payment_status NOT IN ('paid', 'partially_refunded', 'refunded') AND payment_due_at <= $1
       ORDER BY payment_due_at, id
       LIMIT $2
       FOR UPDATE SKIP LOCKED",
      ORDER_COLUMNS
    ))
    .bind(now)
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(&mut *self.tx)
    .await
    .map_err(db)?;
    convert_all(rows)
  }

  #[instrument(level = "debug", skip_all, fields(order_id = %order.id, version = order.version))]
  async fn update_order(&mut self, order: &mut Order) -> Result<()> {
    let done = sqlx::query(
      "UPDATE orders SET status = $3, payment_status = $4, fulfillment_status = $5, customer_note = $6,
         has_active_reservation = $7, stock_committed = $8, reservation_expires_at = $9, payment_due_at = $10,
         carrier = $11, tracking_number = $12, estimated_delivery = $13, shipped_at = $14, delivered_at = $15,
         cancelled_at = $16, cancellation_reason = $17, updated_at = $18, version = version + 1
       WHERE id = $1 AND version = $2",
    )
    .bind(order.id)
    .bind(order.version)
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(order.fulfillment_status.as_str())
    .bind(&order.customer_note)
    .bind(order.has_active_reservation)
    .bind(order.stock_committed)
    .bind(order.reservation_expires_at)
    .bind(order.payment_due_at)
    .bind(&order.carrier)
    .bind(&order.tracking_number)
    .bind(order.estimated_delivery)
    .bind(order.shipped_at)
    .bind(order.delivered_at)
    .bind(order.cancelled_at)
    .bind(&order.cancellation_reason)
    .bind(order.updated_at)
    .execute(&mut *self.tx)
    .await
    .map_err(db)?;

    if done.rows_affected() == 1 {
      order.version += 1;
      return Ok(());
    }
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
      .bind(order.id)
      .fetch_one(&mut *self.tx)
      .await
      .map_err(db)?;
    if exists {
      Err(OrderflowError::Conflict {
        order_id: order.id,
        expected_version: order.version,
      })
    } else {
      Err(OrderflowError::OrderNotFound(order.id.to_string()))
    }
  }
}

#[async_trait]
impl PaymentRepository for PgTx {
  async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
    sqlx::query(
      "INSERT INTO payments (id, order_id, user_id, provider, method, status, amount, currency, external_id,
         transaction_id, checkout_url, failure_reason, refund_amount, processed_at, created_at, updated_at)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(payment.id)
    .bind(payment.order_id)
    .bind(payment.user_id)
    .bind(&payment.provider)
    .bind(payment.method.as_str())
    .bind(payment.status.as_str())
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(&payment.external_id)
    .bind(&payment.transaction_id)
    .bind(&payment.checkout_url)
    .bind(&payment.failure_reason)
    .bind(payment.refund_amount)
    .bind(payment.processed_at)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut *self.tx)
    .await
    .map_err(db)?;
    Ok(())
  }

  async fn find_payment_by_reference(&mut self, reference: &str) -> Result<Option<Payment>> {
    let row: Option<PaymentRow> = sqlx::query_as(&format!(
      "SELECT {} FROM payments WHERE external_id = $1 OR transaction_id = $1 LIMIT 1 FOR UPDATE",
      PAYMENT_COLUMNS
    ))
    .bind(reference)
    .fetch_optional(&mut *self.tx)
    .await
    .map_err(db)?;
    row.map(Payment::try_from).transpose()
  }

  async fn payments_for_order(&mut self, order_id: Uuid) -> Result<Vec<Payment>> {
    let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
      "SELECT {} FROM payments WHERE order_id = $1 ORDER BY created_at, id",
      PAYMENT_COLUMNS
    ))
    .bind(order_id)
    .fetch_all(&mut *self.tx)
    .await
    .map_err(db)?;
    convert_all(rows)
  }

  async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
    let done = sqlx::query(
      "UPDATE payments SET status = $2, external_id = $3, transaction_id = $4, checkout_url = $5,
         failure_reason = $6, refund_amount = $7, processed_at = $8, updated_at = $9
       WHERE id = $1",
    )
    .bind(payment.id)
    .bind(payment.status.as_str())
    .bind(&payment.external_id)
    .bind(&payment.transaction_id)
    .bind(&payment.checkout_url)
    .bind(&payment.failure_reason)
    .bind(payment.refund_amount)
    .bind(payment.processed_at)
    .bind(payment.updated_at)
    .execute(&mut *self.tx)
    .await
    .map_err(db)?;
    if done.rows_affected() == 0 {
      return Err(OrderflowError::PaymentNotFound(payment.id.to_string()));
    }
    Ok(())
  }
}
