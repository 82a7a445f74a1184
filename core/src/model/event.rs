// orderflow/src/model/event.rs

use super::text_enum;
use crate::error::OrderflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventType {
  OrderCreated,
  InventoryReserved,
  InventoryConfirmed,
  InventoryReleased,
  InventoryRestored,
  InventoryShortfall,
  ReservationExpired,
  StatusChanged,
  PaymentReceived,
  PaymentFailed,
  RefundRequired,
  Refunded,
  Cancelled,
  Shipped,
  Delivered,
  NoteAdded,
}

text_enum!(OrderEventType {
  OrderCreated => "order_created",
  InventoryReserved => "inventory_reserved",
  InventoryConfirmed => "inventory_confirmed",
  InventoryReleased => "inventory_released",
  InventoryRestored => "inventory_restored",
  InventoryShortfall => "inventory_shortfall",
  ReservationExpired => "reservation_expired",
  StatusChanged => "status_changed",
  PaymentReceived => "payment_received",
  PaymentFailed => "payment_failed",
  RefundRequired => "refund_required",
  Refunded => "refunded",
  Cancelled => "cancelled",
  Shipped => "shipped",
  Delivered => "delivered",
  NoteAdded => "note_added",
});

impl OrderEventType {
  /// Inventory bookkeeping stays on the admin timeline; the rest is shown to customers.
  pub fn is_public_by_default(&self) -> bool {
    !matches!(
      self,
      OrderEventType::InventoryReserved
        | OrderEventType::InventoryConfirmed
        | OrderEventType::InventoryReleased
        | OrderEventType::InventoryRestored
        | OrderEventType::InventoryShortfall
        | OrderEventType::ReservationExpired
        | OrderEventType::RefundRequired
    )
  }
}

/// Who caused a state change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Actor {
  Customer(Uuid),
  Admin(Uuid),
  System,
  Gateway(String),
}

impl std::fmt::Display for Actor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Actor::Customer(id) => write!(f, "customer:{}", id),
      Actor::Admin(id) => write!(f, "admin:{}", id),
      Actor::System => f.write_str("system"),
      Actor::Gateway(provider) => write!(f, "gateway:{}", provider),
    }
  }
}

impl std::str::FromStr for Actor {
  type Err = OrderflowError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || OrderflowError::Validation(format!("unknown actor '{}'", s));
    match s.split_once(':') {
      None if s == "system" => Ok(Actor::System),
      Some(("customer", id)) => Uuid::parse_str(id).map(Actor::Customer).map_err(|_| invalid()),
      Some(("admin", id)) => Uuid::parse_str(id).map(Actor::Admin).map_err(|_| invalid()),
      Some(("gateway", provider)) if !provider.is_empty() => Ok(Actor::Gateway(provider.to_string())),
      _ => Err(invalid()),
    }
  }
}

impl Serialize for Actor {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Actor {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}

/// One immutable timeline entry. `sequence` orders entries written in the same instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
  pub id: Uuid,
  pub sequence: i64,
  pub order_id: Uuid,
  pub event_type: OrderEventType,
  pub payload: JsonValue,
  pub actor: Actor,
  pub is_public: bool,
  pub created_at: DateTime<Utc>,
}

/// An event waiting to be appended.
#[derive(Debug, Clone)]
pub struct NewOrderEvent {
  pub order_id: Uuid,
  pub event_type: OrderEventType,
  pub payload: JsonValue,
  pub actor: Actor,
  pub is_public: bool,
}

impl NewOrderEvent {
  pub fn new(order_id: Uuid, event_type: OrderEventType, actor: Actor) -> Self {
    Self {
      order_id,
      event_type,
      payload: JsonValue::Object(Default::default()),
      actor,
      is_public: event_type.is_public_by_default(),
    }
  }

  pub fn with_payload(mut self, payload: JsonValue) -> Self {
    self.payload = payload;
    self
  }

  pub fn visibility(mut self, is_public: bool) -> Self {
    self.is_public = is_public;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn actor_text_round_trip() {
    let id = Uuid::new_v4();
    for actor in [Actor::Customer(id), Actor::Admin(id), Actor::System, Actor::Gateway("stripe".into())] {
      let parsed: Actor = actor.to_string().parse().unwrap();
      assert_eq!(parsed, actor);
    }
    assert!("robot:42".parse::<Actor>().is_err());
    assert!("gateway:".parse::<Actor>().is_err());
  }

  #[test]
  fn inventory_events_are_private_by_default() {
    let order_id = Uuid::new_v4();
    assert!(!NewOrderEvent::new(order_id, OrderEventType::InventoryReserved, Actor::System).is_public);
    assert!(NewOrderEvent::new(order_id, OrderEventType::OrderCreated, Actor::System).is_public);
    assert!(!NewOrderEvent::new(order_id, OrderEventType::NoteAdded, Actor::System).visibility(false).is_public);
  }
}
