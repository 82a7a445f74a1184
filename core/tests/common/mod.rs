// tests/common/mod.rs
#![allow(dead_code)] // Each test binary uses a different subset of these helpers.

use async_trait::async_trait;
use chrono::Utc;
use orderflow::model::{AddressInput, CartItem, CreateOrderRequest, Order, OrderItem, Product};
use orderflow::reconciler::{sign_payload, verify_signature};
use orderflow::{
  CheckoutSession, Engine, MemoryStore, Notification, NotificationDispatcher, OrderDetails, OrderOrchestrator,
  OrderflowConfig, OrderflowError, PaymentGateway, PaymentReconciler, SessionState,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Level;
use uuid::Uuid;

pub const PROVIDER: &str = "testpay";
pub const SECRET: &str = "whsec_orderflow_tests";

// --- Fake gateway ---

/// Issues predictable session ids and signs webhook payloads with [`SECRET`].
#[derive(Default)]
pub struct TestGateway {
  next_session: AtomicUsize,
  sessions: Mutex<HashMap<String, SessionState>>,
  pub created_sessions: AtomicUsize,
}

impl TestGateway {
  /// Makes `retrieve_session` report the session as captured.
  pub fn capture(&self, session_id: &str) {
    if let Some(state) = self.sessions.lock().get_mut(session_id) {
      state.paid = true;
    }
  }

  pub fn sign(&self, payload: &[u8]) -> String {
    sign_payload(SECRET, Utc::now().timestamp(), payload).unwrap()
  }
}

#[async_trait]
impl PaymentGateway for TestGateway {
  fn provider(&self) -> &str {
    PROVIDER
  }

  fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> orderflow::Result<()> {
    let header =
      signature.ok_or_else(|| OrderflowError::InvalidSignature("missing signature header".to_string()))?;
    verify_signature(payload, header, SECRET, 300, Utc::now())
  }

  async fn create_checkout_session(&self, order: &Order, _items: &[OrderItem]) -> orderflow::Result<CheckoutSession> {
    let n = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
    self.created_sessions.fetch_add(1, Ordering::SeqCst);
    let session = CheckoutSession {
      id: format!("cs_test_{}", n),
      url: Some(format!("https://pay.test/{}?order={}", n, order.order_number)),
      transaction_id: Some(format!("pi_test_{}", n)),
    };
    self.sessions.lock().insert(
      session.id.clone(),
      SessionState {
        paid: false,
        transaction_id: session.transaction_id.clone(),
      },
    );
    Ok(session)
  }

  async fn retrieve_session(&self, session_id: &str) -> orderflow::Result<SessionState> {
    self
      .sessions
      .lock()
      .get(session_id)
      .cloned()
      .ok_or_else(|| OrderflowError::Gateway(format!("no such session {}", session_id)))
  }
}

// --- Webhook payloads ---

pub fn session_completed(session_id: &str, payment_intent: &str) -> Vec<u8> {
  json!({
    "id": format!("evt_{}", session_id),
    "type": "checkout.session.completed",
    "data": { "object": { "id": session_id, "payment_intent": payment_intent } }
  })
  .to_string()
  .into_bytes()
}

pub fn intent_failed(payment_intent: &str, reason: &str) -> Vec<u8> {
  json!({
    "type": "payment_intent.payment_failed",
    "data": { "object": { "id": payment_intent, "last_payment_error": { "message": reason } } }
  })
  .to_string()
  .into_bytes()
}

pub fn charge_refunded(payment_intent: &str, amount_refunded_cents: i64) -> Vec<u8> {
  json!({
    "type": "charge.refunded",
    "data": { "object": { "payment_intent": payment_intent, "amount_refunded": amount_refunded_cents } }
  })
  .to_string()
  .into_bytes()
}

// --- Harness ---

pub struct Harness {
  pub store: MemoryStore,
  pub gateway: Arc<TestGateway>,
  pub engine: Engine,
  pub orchestrator: OrderOrchestrator,
  pub reconciler: PaymentReconciler,
  notifications: Mutex<mpsc::Receiver<Notification>>,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_config(OrderflowConfig::default())
  }

  pub fn with_config(config: OrderflowConfig) -> Self {
    setup_tracing();
    let store = MemoryStore::new();
    let gateway = Arc::new(TestGateway::default());
    let (dispatcher, receiver) = NotificationDispatcher::channel(config.notification_queue_capacity);
    let engine = Engine::new(
      Arc::new(store.clone()),
      Arc::new(store.clone()),
      gateway.clone(),
      dispatcher,
      config,
    );
    Self {
      orchestrator: engine.orchestrator(),
      reconciler: engine.reconciler(),
      store,
      gateway,
      engine,
      notifications: Mutex::new(receiver),
    }
  }

  pub async fn product(&self, name: &str, price_cents: i64, on_hand: i32) -> Product {
    let product = Product {
      id: Uuid::new_v4(),
      name: name.to_string(),
      sku: format!("SKU-{}", name.to_uppercase()),
      price: Decimal::new(price_cents, 2),
      is_active: true,
    };
    self.store.seed_product(product.clone(), on_hand).await;
    product
  }

  /// Fills the user's cart and creates an order from it.
  pub async fn place_order(
    &self,
    user_id: Uuid,
    lines: &[(&Product, i32)],
    payment_method: &str,
  ) -> Result<OrderDetails, OrderflowError> {
    let items = lines
      .iter()
      .map(|(p, qty)| CartItem {
        product_id: p.id,
        quantity: *qty,
      })
      .collect();
    self.store.seed_cart(user_id, items).await;
    self.orchestrator.create_order(user_id, order_request(payment_method)).await
  }

  /// Opens a checkout session and delivers a signed `checkout.session.completed`.
  pub async fn pay(&self, order: &Order) -> CheckoutSession {
    let session = self
      .orchestrator
      .create_checkout_session(order.id, order.user_id)
      .await
      .unwrap();
    self.deliver(&session_completed(&session.id, session.transaction_id.as_deref().unwrap())).await.unwrap();
    session
  }

  pub async fn deliver(&self, payload: &[u8]) -> orderflow::Result<orderflow::ReconcileOutcome> {
    let signature = self.gateway.sign(payload);
    self.reconciler.handle_webhook(PROVIDER, payload, Some(&signature)).await
  }

  pub async fn available(&self, product: &Product) -> i32 {
    self.store.stock_level(product.id).await.unwrap().available()
  }

  pub async fn on_hand(&self, product: &Product) -> i32 {
    self.store.stock_level(product.id).await.unwrap().on_hand
  }

  /// Notifications queued so far, in order.
  pub fn drain_notifications(&self) -> Vec<Notification> {
    let mut receiver = self.notifications.lock();
    let mut drained = Vec::new();
    while let Ok(n) = receiver.try_recv() {
      drained.push(n);
    }
    drained
  }
}

pub fn address() -> AddressInput {
  AddressInput {
    full_name: "Ada Lovelace".to_string(),
    line1: "12 Analytical Row".to_string(),
    line2: None,
    city: "London".to_string(),
    state: None,
    zip: "N1 9GU".to_string(),
    country: "gb".to_string(),
    phone: "+44 20 7946 0018".to_string(),
  }
}

pub fn order_request(payment_method: &str) -> CreateOrderRequest {
  CreateOrderRequest {
    shipping_address: address(),
    billing_address: None,
    payment_method: payment_method.to_string(),
    tax_rate: Decimal::new(10, 2),
    shipping_cost: Decimal::new(500, 2),
    discount: Decimal::ZERO,
    currency: None,
    customer_note: None,
  }
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
