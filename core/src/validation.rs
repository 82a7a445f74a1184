// orderflow/src/validation.rs

//! Request validation. Runs before any transaction is opened.

use crate::error::{OrderflowError, Result};
use crate::model::{AddressInput, AddressSnapshot, CreateOrderRequest, OrderTotals, PaymentMethod};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[1-9][0-9]{6,14}$").expect("static regex"));
static COUNTRY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}$").expect("static regex"));
static CURRENCY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}$").expect("static regex"));

/// A request that passed validation, with addresses already snapshotted.
#[derive(Debug, Clone)]
pub struct ValidatedOrderRequest {
  pub shipping_address: AddressSnapshot,
  pub billing_address: AddressSnapshot,
  pub payment_method: PaymentMethod,
  pub tax_rate: Decimal,
  pub shipping_cost: Decimal,
  pub discount: Decimal,
  pub currency: Option<String>,
  pub customer_note: Option<String>,
}

pub fn validate_create_order(request: &CreateOrderRequest) -> Result<ValidatedOrderRequest> {
  let shipping_address = validate_address("shipping_address", &request.shipping_address)?;
  let billing_address = match &request.billing_address {
    Some(billing) => validate_address("billing_address", billing)?,
    None => shipping_address.clone(),
  };

  let payment_method = request.payment_method.trim().parse::<PaymentMethod>().map_err(|_| {
    OrderflowError::Validation(format!("payment_method '{}' is not supported", request.payment_method))
  })?;

  if request.tax_rate < Decimal::ZERO || request.tax_rate > Decimal::ONE {
    return Err(OrderflowError::Validation("tax_rate must be between 0 and 1".to_string()));
  }
  validate_amount("shipping_cost", request.shipping_cost)?;
  validate_amount("discount", request.discount)?;

  let currency = match request.currency.as_deref().map(str::trim) {
    Some(c) if !CURRENCY_RE.is_match(c) => {
      return Err(OrderflowError::Validation(format!("currency '{}' is not an ISO 4217 code", c)));
    }
    other => other.map(str::to_string),
  };

  let customer_note = request
    .customer_note
    .as_deref()
    .map(str::trim)
    .filter(|n| !n.is_empty())
    .map(str::to_string);
  if customer_note.as_ref().is_some_and(|n| n.chars().count() > 1000) {
    return Err(OrderflowError::Validation("customer_note is limited to 1000 characters".to_string()));
  }

  Ok(ValidatedOrderRequest {
    shipping_address,
    billing_address,
    payment_method,
    tax_rate: request.tax_rate,
    shipping_cost: request.shipping_cost,
    discount: request.discount,
    currency,
    customer_note,
  })
}

fn validate_amount(field: &str, value: Decimal) -> Result<()> {
  if value < Decimal::ZERO {
    return Err(OrderflowError::Validation(format!("{} must not be negative", field)));
  }
  if value > OrderTotals::MAX_AMOUNT {
    return Err(OrderflowError::Validation(format!("{} must not exceed {}", field, OrderTotals::MAX_AMOUNT)));
  }
  Ok(())
}

fn validate_address(field: &str, input: &AddressInput) -> Result<AddressSnapshot> {
  let required = |name: &str, value: &str| -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
      return Err(OrderflowError::Validation(format!("{}.{} is required", field, name)));
    }
    Ok(value.to_string())
  };

  let zip = required("zip", &input.zip)?;
  if !(3..=10).contains(&zip.chars().count()) {
    return Err(OrderflowError::Validation(format!("{}.zip must be 3 to 10 characters", field)));
  }
  let country = required("country", &input.country)?.to_ascii_uppercase();
  if !COUNTRY_RE.is_match(&country) {
    return Err(OrderflowError::Validation(format!("{}.country must be a 2-letter code", field)));
  }
  let phone: String = required("phone", &input.phone)?
    .chars()
    .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
    .collect();
  if !PHONE_RE.is_match(&phone) {
    return Err(OrderflowError::Validation(format!("{}.phone is not a valid phone number", field)));
  }

  let optional = |value: &Option<String>| value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);

  Ok(AddressSnapshot {
    full_name: required("full_name", &input.full_name)?,
    line1: required("line1", &input.line1)?,
    line2: optional(&input.line2),
    city: required("city", &input.city)?,
    state: optional(&input.state),
    zip,
    country,
    phone,
  })
}
