// orderflow/src/config.rs

//! Tunables shared by the orchestrator, reconciler, sweeper and notification worker.

use chrono::Duration;

#[derive(Debug, Clone)]
pub struct OrderflowConfig {
  /// How long a stock hold lives before the sweeper releases it.
  pub reservation_ttl: Duration,
  /// Deadline recorded on the order for online payment completion.
  pub payment_timeout: Duration,
  pub sweep_interval: std::time::Duration,
  pub sweep_batch_size: usize,
  pub order_number_attempts: u32,
  pub notification_queue_capacity: usize,
  pub notification_max_attempts: u32,
  pub notification_retry_backoff: std::time::Duration,
  /// Maximum age, in seconds, of a signed webhook timestamp.
  pub webhook_tolerance_secs: i64,
  pub default_currency: String,
}

impl Default for OrderflowConfig {
  fn default() -> Self {
    Self {
      reservation_ttl: Duration::minutes(15),
      payment_timeout: Duration::minutes(30),
      sweep_interval: std::time::Duration::from_secs(60),
      sweep_batch_size: 100,
      order_number_attempts: 5,
      notification_queue_capacity: 1024,
      notification_max_attempts: 3,
      notification_retry_backoff: std::time::Duration::from_millis(250),
      webhook_tolerance_secs: 300,
      default_currency: "USD".to_string(),
    }
  }
}
