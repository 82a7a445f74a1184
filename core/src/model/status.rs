// orderflow/src/model/status.rs

//! Order, payment and fulfilment status enums and the central order transition table.

use super::text_enum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
  Pending,
  Confirmed,
  Processing,
  ReadyToShip,
  Shipped,
  OutForDelivery,
  Delivered,
  Cancelled,
  Refunded,
  Returned,
}

text_enum!(OrderStatus {
  Pending => "pending",
  Confirmed => "confirmed",
  Processing => "processing",
  ReadyToShip => "ready_to_ship",
  Shipped => "shipped",
  OutForDelivery => "out_for_delivery",
  Delivered => "delivered",
  Cancelled => "cancelled",
  Refunded => "refunded",
  Returned => "returned",
});

impl OrderStatus {
  /// Every status the order may move to from `self`. This table is the only place
  /// transitions are decided.
  pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match self {
      Pending => &[Confirmed, Cancelled],
      Confirmed => &[Processing, Cancelled, Refunded],
      Processing => &[ReadyToShip, Shipped, Cancelled, Refunded],
      ReadyToShip => &[Shipped, Refunded],
      Shipped => &[OutForDelivery, Delivered],
      OutForDelivery => &[Delivered],
      // Delivered is terminal for forward progress; a return is the one way out.
      Delivered => &[Returned],
      Cancelled | Refunded | Returned => &[],
    }
  }

  pub fn can_transition_to(&self, next: OrderStatus) -> bool {
    self.allowed_transitions().contains(&next)
  }

  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded | OrderStatus::Returned
    )
  }

  pub fn can_be_cancelled(&self) -> bool {
    self.can_transition_to(OrderStatus::Cancelled)
  }

  pub fn can_be_shipped(&self) -> bool {
    matches!(self, OrderStatus::Processing | OrderStatus::ReadyToShip)
  }

  pub fn can_be_delivered(&self) -> bool {
    matches!(self, OrderStatus::Shipped | OrderStatus::OutForDelivery)
  }

  /// Statuses the customer is told about.
  pub fn is_customer_visible(&self) -> bool {
    !matches!(self, OrderStatus::Processing | OrderStatus::ReadyToShip)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
  /// Online payment not yet settled by the gateway.
  Pending,
  /// Offline payment (cash on delivery) to be collected later.
  AwaitingPayment,
  Paid,
  Failed,
  PartiallyRefunded,
  Refunded,
}

text_enum!(PaymentStatus {
  Pending => "pending",
  AwaitingPayment => "awaiting_payment",
  Paid => "paid",
  Failed => "failed",
  PartiallyRefunded => "partially_refunded",
  Refunded => "refunded",
});

impl PaymentStatus {
  /// Money was captured at some point (refunds included).
  pub fn is_settled(&self) -> bool {
    matches!(
      self,
      PaymentStatus::Paid | PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
  Unfulfilled,
  Packed,
  Shipped,
  Delivered,
  Returned,
}

text_enum!(FulfillmentStatus {
  Unfulfilled => "unfulfilled",
  Packed => "packed",
  Shipped => "shipped",
  Delivered => "delivered",
  Returned => "returned",
});

impl FulfillmentStatus {
  /// The goods have not left the warehouse yet, so committed stock can go back on the shelf.
  pub fn is_in_warehouse(&self) -> bool {
    matches!(self, FulfillmentStatus::Unfulfilled | FulfillmentStatus::Packed)
  }
}
