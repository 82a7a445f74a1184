// orderflow/src/model/mod.rs

//! Domain records owned by the reconciliation engine.

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum stored as text.
macro_rules! text_enum {
  ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
    impl $name {
      pub fn as_str(&self) -> &'static str {
        match self {
          $($name::$variant => $text),+
        }
      }
    }

    impl std::fmt::Display for $name {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl std::str::FromStr for $name {
      type Err = crate::error::OrderflowError;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
          $($text => Ok($name::$variant),)+
          other => Err(crate::error::OrderflowError::Validation(format!(
            "unknown {} '{}'",
            stringify!($name),
            other
          ))),
        }
      }
    }
  };
}

pub(crate) use text_enum;

pub mod cart;
pub mod event;
pub mod order;
pub mod payment;
pub mod request;
pub mod reservation;
pub mod status;

pub use cart::{Cart, CartItem, Product, StockLevel};
pub use event::{Actor, NewOrderEvent, OrderEvent, OrderEventType};
pub use order::{AddressSnapshot, Order, OrderItem, OrderTotals, ShippingInfo};
pub use payment::{Payment, PaymentMethod};
pub use request::{AddressInput, CreateOrderRequest, OrderFilter};
pub use reservation::{ReservationStatus, StockReservation};
pub use status::{FulfillmentStatus, OrderStatus, PaymentStatus};
