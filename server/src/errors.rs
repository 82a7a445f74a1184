// orderflow_server/src/errors.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use orderflow::OrderflowError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Authentication Failed: {0}")]
  Auth(String),

  #[error("Forbidden: {0}")]
  Forbidden(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Migration Error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  #[error("{source}")]
  Orderflow {
    #[from]
    source: OrderflowError,
  },

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl AppError {
  /// Stable machine code put in the `error` field of the response body.
  pub fn code(&self) -> &'static str {
    match self {
      AppError::Auth(_) => "unauthenticated",
      AppError::Forbidden(_) => "forbidden",
      AppError::Config(_) => "configuration_error",
      AppError::Sqlx(_) | AppError::Migrate(_) => "storage_error",
      AppError::Orderflow { source } => source.code(),
      AppError::Internal(_) => "internal_error",
    }
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      AppError::Auth(_) => StatusCode::UNAUTHORIZED,
      AppError::Forbidden(_) => StatusCode::FORBIDDEN,
      AppError::Orderflow { source } => match source {
        OrderflowError::Validation(_) | OrderflowError::ProductUnavailable { .. } => StatusCode::BAD_REQUEST,
        // No retry incentive for payloads that will never verify.
        OrderflowError::InvalidSignature(_) => StatusCode::BAD_REQUEST,
        OrderflowError::EmptyCart => StatusCode::UNPROCESSABLE_ENTITY,
        OrderflowError::PaymentMismatch(_) => StatusCode::FORBIDDEN,
        OrderflowError::OrderNotFound(_) | OrderflowError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        OrderflowError::InsufficientStock { .. }
        | OrderflowError::InvalidStateTransition { .. }
        | OrderflowError::Conflict { .. } => StatusCode::CONFLICT,
        OrderflowError::Gateway(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
      },
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn error_response(&self) -> HttpResponse {
    let status = self.status_code();
    // Internal details stay in the log.
    let detail = if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
      tracing::error!(application_error = %self, code = self.code(), "Responding with error");
      "An internal error occurred".to_string()
    } else {
      tracing::warn!(application_error = %self, code = self.code(), "Request rejected");
      self.to_string()
    };
    HttpResponse::build(status).json(json!({ "error": self.code(), "detail": detail }))
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
