// orderflow/src/orchestrator/create.rs

//! The create-order workflow as a step pipeline.
//!
//! `validate_request` runs before any transaction exists. Every later step shares the one
//! transaction opened by `begin_transaction`; the caller commits only when the pipeline
//! completes, so a failure at any step leaves nothing behind. `record_events` is optional:
//! it only collects timeline entries, which are written after commit.

use super::numbers::{allocate_order_number, insert_order_with_fresh_number, OrderNumberGenerator};
use crate::config::OrderflowConfig;
use crate::error::{OrderflowError, Result};
use crate::model::{
  Actor, Cart, CreateOrderRequest, FulfillmentStatus, NewOrderEvent, Order, OrderEventType, OrderItem, OrderStatus,
  OrderTotals, Payment, PaymentStatus, StockReservation,
};
use crate::pipeline::{ContextData, Pipeline, PipelineControl};
use crate::reservation::StockStrategy;
use crate::store::{CartRepository, CommerceStore, InventoryLedger, OrderRepository, PaymentRepository, ProductCatalog, TxHandle};
use crate::validation::{validate_create_order, ValidatedOrderRequest};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const CREATE_ORDER_STEPS: [&str; 11] = [
  "validate_request",
  "begin_transaction",
  "load_cart",
  "fetch_products",
  "check_stock",
  "compute_totals",
  "assign_order_number",
  "persist_order",
  "reserve_stock",
  "convert_cart",
  "record_events",
];

pub struct CreateOrderCtx {
  pub order_id: Uuid,
  pub user_id: Uuid,
  pub request: CreateOrderRequest,
  pub now: DateTime<Utc>,
  pub tx: Option<TxHandle>,
  pub validated: Option<ValidatedOrderRequest>,
  pub cart: Option<Cart>,
  pub items: Vec<OrderItem>,
  pub totals: Option<OrderTotals>,
  pub order_number: Option<String>,
  pub order: Option<Order>,
  pub payment: Option<Payment>,
  pub reservations: Vec<StockReservation>,
  pub pending_events: Vec<NewOrderEvent>,
}

impl CreateOrderCtx {
  pub fn new(user_id: Uuid, request: CreateOrderRequest, now: DateTime<Utc>) -> Self {
    Self {
      order_id: Uuid::new_v4(),
      user_id,
      request,
      now,
      tx: None,
      validated: None,
      cart: None,
      items: Vec::new(),
      totals: None,
      order_number: None,
      order: None,
      payment: None,
      reservations: Vec::new(),
      pending_events: Vec::new(),
    }
  }

  fn tx(&self) -> Result<TxHandle> {
    self
      .tx
      .clone()
      .ok_or_else(|| OrderflowError::Internal("create-order step ran before begin_transaction".to_string()))
  }

  fn missing(what: &str) -> OrderflowError {
    OrderflowError::Internal(format!("create-order context has no {} yet", what))
  }
}

type Ctx = ContextData<CreateOrderCtx>;

pub fn build_create_order_pipeline(
  store: Arc<dyn CommerceStore>,
  stock: Arc<dyn StockStrategy>,
  order_numbers: Arc<dyn OrderNumberGenerator>,
  config: Arc<OrderflowConfig>,
) -> Pipeline<CreateOrderCtx, OrderflowError> {
  let steps: Vec<(&str, bool, Option<crate::pipeline::SkipCondition<CreateOrderCtx>>)> = CREATE_ORDER_STEPS
    .iter()
    .map(|name| (*name, *name == "record_events", None))
    .collect();
  let mut pipeline = Pipeline::new(&steps);

  pipeline.on_root("validate_request", validate_request);
  pipeline.on_root("begin_transaction", move |ctx| begin_transaction(ctx, store.clone()));
  pipeline.on_root("load_cart", load_cart);
  pipeline.on_root("fetch_products", fetch_products);
  let check_stock_strategy = stock.clone();
  pipeline.on_root("check_stock", move |ctx| check_stock(ctx, check_stock_strategy.clone()));
  pipeline.on_root("compute_totals", compute_totals);
  let attempts = config.order_number_attempts;
  let assign_numbers = order_numbers.clone();
  pipeline.on_root("assign_order_number", move |ctx| {
    assign_order_number(ctx, assign_numbers.clone(), attempts)
  });
  pipeline.on_root("persist_order", move |ctx| {
    persist_order(ctx, config.clone(), order_numbers.clone())
  });
  pipeline.on_root("reserve_stock", move |ctx| reserve_stock(ctx, stock.clone()));
  pipeline.on_root("convert_cart", convert_cart);
  pipeline.on_root("record_events", record_events);
  pipeline
}

async fn validate_request(ctx: Ctx) -> Result<PipelineControl> {
  let validated = validate_create_order(&ctx.read().request)?;
  ctx.write().validated = Some(validated);
  Ok(PipelineControl::Continue)
}

async fn begin_transaction(ctx: Ctx, store: Arc<dyn CommerceStore>) -> Result<PipelineControl> {
  let tx = store.begin().await?;
  ctx.write().tx = Some(TxHandle::new(tx));
  Ok(PipelineControl::Continue)
}

async fn load_cart(ctx: Ctx) -> Result<PipelineControl> {
  let (tx, user_id) = {
    let c = ctx.read();
    (c.tx()?, c.user_id)
  };
  let cart = tx.lock().await.active_cart(user_id).await?;
  match cart {
    Some(cart) if !cart.items.is_empty() => {
      debug!(cart_id = %cart.id, lines = cart.items.len(), "Cart loaded.");
      ctx.write().cart = Some(cart);
      Ok(PipelineControl::Continue)
    }
    _ => Err(OrderflowError::EmptyCart),
  }
}

async fn fetch_products(ctx: Ctx) -> Result<PipelineControl> {
  let (tx, cart, order_id) = {
    let c = ctx.read();
    (c.tx()?, c.cart.clone().ok_or_else(|| CreateOrderCtx::missing("cart"))?, c.order_id)
  };

  let mut ids: Vec<Uuid> = cart.items.iter().map(|i| i.product_id).collect();
  ids.sort();
  ids.dedup();
  let products: HashMap<Uuid, _> = tx
    .lock()
    .await
    .products_by_ids(&ids)
    .await?
    .into_iter()
    .map(|p| (p.id, p))
    .collect();

  let mut items = Vec::with_capacity(cart.items.len());
  for line in &cart.items {
    if line.quantity <= 0 {
      return Err(OrderflowError::Validation(format!(
        "cart line for product {} has quantity {}",
        line.product_id, line.quantity
      )));
    }
    let product = products
      .get(&line.product_id)
      .filter(|p| p.is_active)
      .ok_or(OrderflowError::ProductUnavailable {
        product_id: line.product_id,
      })?;
    items.push(OrderItem {
      id: Uuid::new_v4(),
      order_id,
      product_id: product.id,
      product_name: product.name.clone(),
      sku: product.sku.clone(),
      unit_price: product.price,
      quantity: line.quantity,
      line_total: OrderTotals::line_total(product.price, line.quantity)?,
    });
  }
  ctx.write().items = items;
  Ok(PipelineControl::Continue)
}

fn lines_by_product(items: &[OrderItem]) -> BTreeMap<Uuid, i32> {
  let mut lines = BTreeMap::new();
  for item in items {
    let qty = lines.entry(item.product_id).or_insert(0i32);
    *qty = qty.saturating_add(item.quantity);
  }
  lines
}

async fn check_stock(ctx: Ctx, stock: Arc<dyn StockStrategy>) -> Result<PipelineControl> {
  let (tx, lines) = {
    let c = ctx.read();
    (c.tx()?, lines_by_product(&c.items))
  };
  let mut guard = tx.lock().await;
  for (product_id, qty) in lines {
    if !stock.can_reserve(&mut **guard, product_id, qty).await? {
      let level = guard.check_availability(product_id).await?;
      return Err(OrderflowError::InsufficientStock {
        product_id,
        requested: qty,
        available: level.available(),
      });
    }
  }
  Ok(PipelineControl::Continue)
}

async fn compute_totals(ctx: Ctx) -> Result<PipelineControl> {
  let totals = {
    let c = ctx.read();
    let v = c.validated.as_ref().ok_or_else(|| CreateOrderCtx::missing("validated request"))?;
    OrderTotals::compute(
      c.items.iter().map(|i| (i.unit_price, i.quantity)),
      v.tax_rate,
      v.shipping_cost,
      v.discount,
    )?
  };
  ctx.write().totals = Some(totals);
  Ok(PipelineControl::Continue)
}

async fn assign_order_number(
  ctx: Ctx,
  order_numbers: Arc<dyn OrderNumberGenerator>,
  attempts: u32,
) -> Result<PipelineControl> {
  let (tx, now) = {
    let c = ctx.read();
    (c.tx()?, c.now)
  };
  let number = {
    let mut guard = tx.lock().await;
    allocate_order_number(&mut **guard, order_numbers.as_ref(), attempts, now).await?
  };
  ctx.write().order_number = Some(number);
  Ok(PipelineControl::Continue)
}

async fn persist_order(
  ctx: Ctx,
  config: Arc<OrderflowConfig>,
  order_numbers: Arc<dyn OrderNumberGenerator>,
) -> Result<PipelineControl> {
  let (tx, mut order, items) = {
    let c = ctx.read();
    let v = c.validated.clone().ok_or_else(|| CreateOrderCtx::missing("validated request"))?;
    let totals = c.totals.ok_or_else(|| CreateOrderCtx::missing("totals"))?;
    let order_number = c.order_number.clone().ok_or_else(|| CreateOrderCtx::missing("order number"))?;
    let online = v.payment_method.is_online();
    let order = Order {
      id: c.order_id,
      order_number,
      user_id: c.user_id,
      status: OrderStatus::Pending,
      payment_status: if online {
        PaymentStatus::Pending
      } else {
        PaymentStatus::AwaitingPayment
      },
      fulfillment_status: FulfillmentStatus::Unfulfilled,
      payment_method: v.payment_method,
      totals,
      currency: v.currency.unwrap_or_else(|| config.default_currency.clone()),
      shipping_address: v.shipping_address,
      billing_address: v.billing_address,
      customer_note: v.customer_note,
      // The reservation is taken later in this same transaction; if it fails nothing commits.
      has_active_reservation: true,
      stock_committed: false,
      reservation_expires_at: Some(c.now + config.reservation_ttl),
      payment_due_at: online.then(|| c.now + config.payment_timeout),
      carrier: None,
      tracking_number: None,
      estimated_delivery: None,
      shipped_at: None,
      delivered_at: None,
      cancelled_at: None,
      cancellation_reason: None,
      version: 1,
      created_at: c.now,
      updated_at: c.now,
    };
    (c.tx()?, order, c.items.clone())
  };

  // Cash on delivery gets its payment row right away; online methods get one when the
  // checkout session is created.
  let payment = (!order.payment_method.is_online()).then(|| Payment {
    id: Uuid::new_v4(),
    order_id: order.id,
    user_id: order.user_id,
    provider: "cash_on_delivery".to_string(),
    method: order.payment_method,
    status: PaymentStatus::AwaitingPayment,
    amount: order.totals.total,
    currency: order.currency.clone(),
    external_id: None,
    transaction_id: None,
    checkout_url: None,
    failure_reason: None,
    refund_amount: Decimal::ZERO,
    processed_at: None,
    created_at: order.created_at,
    updated_at: order.created_at,
  });

  {
    let mut guard = tx.lock().await;
    insert_order_with_fresh_number(
      &mut **guard,
      order_numbers.as_ref(),
      config.order_number_attempts,
      &mut order,
      &items,
    )
    .await?;
    if let Some(payment) = &payment {
      guard.insert_payment(payment).await?;
    }
  }
  debug!(order_id = %order.id, order_number = %order.order_number, "Order persisted.");

  let mut c = ctx.write();
  c.order = Some(order);
  c.payment = payment;
  Ok(PipelineControl::Continue)
}

async fn reserve_stock(ctx: Ctx, stock: Arc<dyn StockStrategy>) -> Result<PipelineControl> {
  let (tx, order_id, lines, now) = {
    let c = ctx.read();
    let lines: Vec<(Uuid, i32)> = c.items.iter().map(|i| (i.product_id, i.quantity)).collect();
    (c.tx()?, c.order_id, lines, c.now)
  };
  let reservations = {
    let mut guard = tx.lock().await;
    stock.reserve_for_order(&mut **guard, order_id, &lines, now).await?
  };
  ctx.write().reservations = reservations;
  Ok(PipelineControl::Continue)
}

async fn convert_cart(ctx: Ctx) -> Result<PipelineControl> {
  let (tx, cart_id, order_id) = {
    let c = ctx.read();
    let cart_id = c.cart.as_ref().map(|cart| cart.id).ok_or_else(|| CreateOrderCtx::missing("cart"))?;
    (c.tx()?, cart_id, c.order_id)
  };
  tx.lock().await.convert_cart(cart_id, order_id).await?;
  Ok(PipelineControl::Continue)
}

async fn record_events(ctx: Ctx) -> Result<PipelineControl> {
  let mut guard = ctx.write();
  let c = &mut *guard;
  let order = c.order.clone().ok_or_else(|| CreateOrderCtx::missing("order"))?;
  let actor = Actor::Customer(order.user_id);
  let reserved: Vec<_> = c
    .reservations
    .iter()
    .map(|r| json!({ "product_id": r.product_id, "quantity": r.quantity, "expires_at": r.expires_at }))
    .collect();

  c.pending_events.push(
    NewOrderEvent::new(order.id, OrderEventType::OrderCreated, actor.clone()).with_payload(json!({
      "order_number": order.order_number,
      "total": order.totals.total,
      "currency": order.currency,
      "payment_method": order.payment_method,
      "items": c.items.len(),
    })),
  );
  c.pending_events.push(
    NewOrderEvent::new(order.id, OrderEventType::InventoryReserved, actor).with_payload(json!({ "items": reserved })),
  );
  Ok(PipelineControl::Continue)
}
