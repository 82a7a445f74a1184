// orderflow/src/reconciler/signature.rs

//! Timestamped HMAC-SHA256 webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>`, where the MAC covers
//! `"<t>.<raw payload>"`. Several `v1` entries may be present during secret rotation.

use crate::error::{OrderflowError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
    .map_err(|e| OrderflowError::Internal(format!("invalid webhook secret: {}", e)))?;
  mac.update(timestamp.to_string().as_bytes());
  mac.update(b".");
  mac.update(payload);
  Ok(mac)
}

/// Builds the header value a gateway would send for `payload` at `timestamp`.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
  let mac = mac_for(secret, timestamp, payload)?;
  Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}

/// Checks `header` against `payload`. Rejects missing parts, stale timestamps
/// (older than `tolerance_secs`) and signatures that match none of the `v1` entries.
pub fn verify_signature(
  payload: &[u8],
  header: &str,
  secret: &str,
  tolerance_secs: i64,
  now: DateTime<Utc>,
) -> Result<()> {
  let mut timestamp: Option<i64> = None;
  let mut signatures: Vec<Vec<u8>> = Vec::new();

  for part in header.split(',') {
    match part.trim().split_once('=') {
      Some(("t", value)) => {
        timestamp = Some(
          value
            .parse()
            .map_err(|_| OrderflowError::InvalidSignature("malformed timestamp".to_string()))?,
        );
      }
      Some(("v1", value)) => {
        if let Ok(bytes) = hex::decode(value) {
          signatures.push(bytes);
        }
      }
      _ => {}
    }
  }

  let timestamp = timestamp.ok_or_else(|| OrderflowError::InvalidSignature("missing timestamp".to_string()))?;
  if signatures.is_empty() {
    return Err(OrderflowError::InvalidSignature("missing v1 signature".to_string()));
  }
  let skew = now.timestamp().checked_sub(timestamp).map(i64::unsigned_abs);
  if !matches!(skew, Some(s) if s <= tolerance_secs.max(0).unsigned_abs()) {
    return Err(OrderflowError::InvalidSignature("timestamp outside tolerance".to_string()));
  }

  for candidate in &signatures {
    // verify_slice compares in constant time.
    if mac_for(secret, timestamp, payload)?.verify_slice(candidate).is_ok() {
      return Ok(());
    }
  }
  Err(OrderflowError::InvalidSignature("signature mismatch".to_string()))
}
