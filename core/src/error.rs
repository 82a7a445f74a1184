// orderflow/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;
use uuid::Uuid;

use crate::model::OrderStatus;

#[derive(Debug, Error)]
pub enum OrderflowError {
  #[error("Validation failed: {0}")]
  Validation(String),

  #[error("Cart is empty")]
  EmptyCart,

  #[error("Product {product_id} is missing or unavailable")]
  ProductUnavailable { product_id: Uuid },

  #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
  InsufficientStock {
    product_id: Uuid,
    requested: i32,
    available: i32,
  },

  #[error("Order not found: {0}")]
  OrderNotFound(String),

  #[error("Payment not found: {0}")]
  PaymentNotFound(String),

  #[error("Invalid order status transition from {from} to {to}")]
  InvalidStateTransition { from: OrderStatus, to: OrderStatus },

  #[error("Payment mismatch: {0}")]
  PaymentMismatch(String),

  #[error("Webhook signature rejected: {0}")]
  InvalidSignature(String),

  #[error("Order {order_id} was modified concurrently (expected version {expected_version})")]
  Conflict { order_id: Uuid, expected_version: i64 },

  #[error("Order number {0} is already taken")]
  OrderNumberTaken(String),

  #[error("Could not allocate a unique order number after {attempts} attempts")]
  OrderNumberExhausted { attempts: u32 },

  #[error("Payment gateway error: {0}")]
  Gateway(String),

  #[error("Handler missing for non-optional step: {step_name}")]
  HandlerMissing { step_name: String },

  #[error("Storage error. Source: {source}")]
  Storage {
    #[source]
    source: AnyhowError,
  },

  #[error("Internal error: {0}")]
  Internal(String),
}

impl OrderflowError {
  /// Stable machine-readable code, safe to hand to API clients.
  pub fn code(&self) -> &'static str {
    match self {
      OrderflowError::Validation(_) => "validation_error",
      OrderflowError::EmptyCart => "empty_cart",
      OrderflowError::ProductUnavailable { .. } => "product_unavailable",
      OrderflowError::InsufficientStock { .. } => "insufficient_stock",
      OrderflowError::OrderNotFound(_) => "order_not_found",
      OrderflowError::PaymentNotFound(_) => "payment_not_found",
      OrderflowError::InvalidStateTransition { .. } => "invalid_state_transition",
      OrderflowError::PaymentMismatch(_) => "payment_mismatch",
      OrderflowError::InvalidSignature(_) => "invalid_signature",
      OrderflowError::Conflict { .. } => "conflict",
      OrderflowError::OrderNumberTaken(_) => "order_number_taken",
      OrderflowError::OrderNumberExhausted { .. } => "order_number_exhausted",
      OrderflowError::Gateway(_) => "gateway_error",
      OrderflowError::HandlerMissing { .. } => "internal_error",
      OrderflowError::Storage { .. } => "storage_error",
      OrderflowError::Internal(_) => "internal_error",
    }
  }

  /// Whether the caller (or the gateway redelivering a webhook) may retry.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      OrderflowError::Gateway(_)
        | OrderflowError::Conflict { .. }
        | OrderflowError::Storage { .. }
        | OrderflowError::PaymentNotFound(_)
    )
  }

  pub fn storage(err: impl Into<AnyhowError>) -> Self {
    OrderflowError::Storage { source: err.into() }
  }
}

impl From<AnyhowError> for OrderflowError {
  fn from(err: AnyhowError) -> Self {
    // Backends sometimes wrap one of our own errors in anyhow; unwrap it instead of
    // burying a business error under "storage".
    match err.downcast::<OrderflowError>() {
      Ok(inner) => inner,
      Err(err) => OrderflowError::Storage { source: err },
    }
  }
}

pub type Result<T, E = OrderflowError> = std::result::Result<T, E>;
