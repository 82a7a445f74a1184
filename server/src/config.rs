// orderflow_server/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use orderflow::OrderflowConfig;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub database_url: String,
  pub app_base_url: String,

  // Mock payment gateway
  pub payment_provider: String,
  pub webhook_secret: String,

  // Mock email notifier
  pub mock_email_sender: String,

  pub run_migrations: bool,

  /// Engine tunables, defaults overridden from the environment.
  pub engine: OrderflowConfig,
}

fn parse_var<T: FromStr>(name: &str, raw: String) -> Result<T>
where
  T::Err: std::fmt::Display,
{
  raw
    .parse::<T>()
    .map_err(|e| AppError::Config(format!("Invalid {}: {}", name, e)))
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok(); // Load .env file if present

    let get_env = |var_name: &str| {
      env::var(var_name).map_err(|e| AppError::Config(format!("Missing environment variable '{}': {}", var_name, e)))
    };

    let server_host = get_env("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let server_port = parse_var("SERVER_PORT", get_env("SERVER_PORT").unwrap_or_else(|_| "8080".to_string()))?;
    let database_url = get_env("DATABASE_URL")?;
    let app_base_url = get_env("APP_BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", server_host, server_port));

    let payment_provider = get_env("PAYMENT_PROVIDER").unwrap_or_else(|_| "mockpay".to_string());
    let webhook_secret = get_env("WEBHOOK_SECRET")?;
    if webhook_secret.trim().is_empty() {
      return Err(AppError::Config("WEBHOOK_SECRET must not be empty".to_string()));
    }
    let mock_email_sender = get_env("MOCK_EMAIL_SENDER").unwrap_or_else(|_| "noreply@example.com".to_string());

    let run_migrations = parse_var("RUN_MIGRATIONS", get_env("RUN_MIGRATIONS").unwrap_or_else(|_| "true".to_string()))?;

    let mut engine = OrderflowConfig::default();
    if let Ok(raw) = get_env("RESERVATION_TTL_SECS") {
      engine.reservation_ttl = chrono::Duration::seconds(parse_var("RESERVATION_TTL_SECS", raw)?);
    }
    if let Ok(raw) = get_env("PAYMENT_TIMEOUT_SECS") {
      engine.payment_timeout = chrono::Duration::seconds(parse_var("PAYMENT_TIMEOUT_SECS", raw)?);
    }
    if let Ok(raw) = get_env("SWEEP_INTERVAL_SECS") {
      let secs: u64 = parse_var("SWEEP_INTERVAL_SECS", raw)?;
      if secs == 0 {
        return Err(AppError::Config("SWEEP_INTERVAL_SECS must be at least 1".to_string()));
      }
      engine.sweep_interval = std::time::Duration::from_secs(secs);
    }

    tracing::info!(
      host = %server_host,
      port = server_port,
      provider = %payment_provider,
      reservation_ttl_secs = engine.reservation_ttl.num_seconds(),
      "Application configuration loaded successfully."
    );

    Ok(Self {
      server_host,
      server_port,
      database_url,
      app_base_url,
      payment_provider,
      webhook_secret,
      mock_email_sender,
      run_migrations,
      engine,
    })
  }
}
