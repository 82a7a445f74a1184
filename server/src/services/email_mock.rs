// orderflow_server/src/services/email_mock.rs
use anyhow::bail;
use async_trait::async_trait;
use orderflow::{Notification, Notifier};
use tracing::info;

#[derive(Debug)]
pub struct SentEmailInfo {
  pub to: String,
  pub from: String,
  pub subject: String,
  pub body_preview: String, // First N chars of body
  pub message_id: String,
}

pub async fn send_mock_email(to: &str, from: &str, subject: &str, body: &str) -> anyhow::Result<SentEmailInfo> {
  info!(
    "Simulating sending email: To='{}', From='{}', Subject='{}'",
    to, from, subject
  );
  tokio::time::sleep(std::time::Duration::from_millis(20)).await; // Simulate network latency

  // Simulate potential failure
  if subject.to_lowercase().contains("fail_test") {
    tracing::warn!("Simulated email failure for subject: {}", subject);
    bail!("Simulated email send failure");
  }

  let body_preview = body.chars().take(50).collect::<String>() + "...";
  let message_id = format!("mock_email_{}", uuid::Uuid::new_v4());
  info!("Mock email sent successfully. Message ID: {}", message_id);

  Ok(SentEmailInfo {
    to: to.to_string(),
    from: from.to_string(),
    subject: subject.to_string(),
    body_preview,
    message_id,
  })
}

/// Renders customer notifications as e-mails and hands them to the mock mailer.
/// Customers are addressed by a per-user alias until an address book is wired in.
pub struct EmailNotifier {
  sender: String,
}

impl EmailNotifier {
  pub fn new(sender: &str) -> Self {
    Self {
      sender: sender.to_string(),
    }
  }
}

pub fn render(notification: &Notification) -> (String, String) {
  match notification {
    Notification::OrderCreated {
      order_number,
      total,
      currency,
      ..
    } => (
      format!("We received your order {}", order_number),
      format!("Thanks for your order. Total due: {} {}.", total, currency),
    ),
    Notification::OrderStatusChanged { order_number, to, .. } => (
      format!("Order {} is now {}", order_number, to),
      format!("Your order {} moved to '{}'.", order_number, to),
    ),
    Notification::PaymentReceived {
      order_number,
      amount,
      currency,
      ..
    } => (
      format!("Payment received for order {}", order_number),
      format!("We received {} {} for order {}.", amount, currency, order_number),
    ),
    Notification::PaymentFailed {
      order_number, reason, ..
    } => (
      format!("Payment failed for order {}", order_number),
      format!("Your payment could not be completed: {}.", reason),
    ),
    Notification::OrderCancelled {
      order_number, reason, ..
    } => (
      format!("Order {} was cancelled", order_number),
      match reason {
        Some(reason) => format!("Your order was cancelled: {}.", reason),
        None => "Your order was cancelled.".to_string(),
      },
    ),
  }
}

fn recipient(notification: &Notification) -> String {
  let user_id = match notification {
    Notification::OrderCreated { user_id, .. }
    | Notification::OrderStatusChanged { user_id, .. }
    | Notification::PaymentReceived { user_id, .. }
    | Notification::PaymentFailed { user_id, .. }
    | Notification::OrderCancelled { user_id, .. } => user_id,
  };
  format!("customer+{}@example.com", user_id.simple())
}

#[async_trait]
impl Notifier for EmailNotifier {
  async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
    let (subject, body) = render(notification);
    send_mock_email(&recipient(notification), &self.sender, &subject, &body).await?;
    Ok(())
  }
}
