// orderflow/src/model/reservation.rs

use super::text_enum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
  Active,
  Confirmed,
  Released,
  Expired,
}

text_enum!(ReservationStatus {
  Active => "active",
  Confirmed => "confirmed",
  Released => "released",
  Expired => "expired",
});

impl ReservationStatus {
  /// A reservation leaves `Active` exactly once and never comes back.
  pub fn is_terminal(&self) -> bool {
    !matches!(self, ReservationStatus::Active)
  }
}

/// A hold on `quantity` units of one product for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
  pub id: Uuid,
  pub order_id: Uuid,
  pub product_id: Uuid,
  pub quantity: i32,
  pub status: ReservationStatus,
  pub expires_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
  pub terminated_at: Option<DateTime<Utc>>,
}

impl StockReservation {
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    self.status == ReservationStatus::Active && self.expires_at <= now
  }
}
