// orderflow/src/model/cart.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
  pub product_id: Uuid,
  pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
  pub id: Uuid,
  pub user_id: Uuid,
  pub items: Vec<CartItem>,
  /// Set when the cart was turned into an order; a converted cart is never reused.
  pub converted_order_id: Option<Uuid>,
}

/// Catalog data the engine needs at order time. Owned by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
  pub id: Uuid,
  pub name: String,
  pub sku: String,
  pub price: Decimal,
  pub is_active: bool,
}

/// Inventory counters for one product, as returned by every ledger primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
  pub product_id: Uuid,
  pub on_hand: i32,
  pub reserved: i32,
}

impl StockLevel {
  pub fn available(&self) -> i32 {
    self.on_hand - self.reserved
  }
}
