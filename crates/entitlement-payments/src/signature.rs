//! HMAC Webhook Signatures
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac-sha256>`. The MAC covers
//! `"{t}.{raw body}"`. Several `v1` entries may appear while a secret is
//! being rotated; any one matching is enough.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Default window for accepting a signed timestamp
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Compute the hex signature for a payload at `timestamp`
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let mut mac = keyed(secret, timestamp)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a complete signature header, as a sender would
pub fn header(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    Ok(format!("t={timestamp},v1={}", sign(secret, timestamp, payload)?))
}

/// Verify a signature header against the raw payload
pub fn verify(secret: &str, header: &str, payload: &[u8], now: i64, tolerance: Duration) -> Result<()> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| PaymentError::WebhookSignature("missing timestamp".into()))?;
    if candidates.is_empty() {
        return Err(PaymentError::WebhookSignature("missing v1 signature".into()));
    }

    let skew = now.abs_diff(timestamp);
    if skew > tolerance.as_secs() {
        return Err(PaymentError::WebhookSignature(format!(
            "timestamp outside tolerance ({skew}s)"
        )));
    }

    for candidate in candidates {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = keyed(secret, timestamp)?;
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(PaymentError::WebhookSignature("no matching signature".into()))
}

fn keyed(secret: &str, timestamp: i64) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Config(format!("webhook secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"type":"subscription.updated","data":{"customer_id":"cus_1"}}"#;
    const NOW: i64 = 1_760_000_000;

    #[test]
    fn test_round_trip() {
        let h = header(SECRET, NOW, BODY).unwrap();
        assert!(verify(SECRET, &h, BODY, NOW + 10, DEFAULT_TOLERANCE).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let h = header("whsec_other", NOW, BODY).unwrap();
        assert!(matches!(
            verify(SECRET, &h, BODY, NOW, DEFAULT_TOLERANCE),
            Err(PaymentError::WebhookSignature(_))
        ));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let h = header(SECRET, NOW, BODY).unwrap();
        let tampered = br#"{"type":"subscription.updated","data":{"customer_id":"cus_2"}}"#;
        assert!(verify(SECRET, &h, tampered, NOW, DEFAULT_TOLERANCE).is_err());
    }

    #[test]
    fn test_expired_timestamp_rejected() {
        let h = header(SECRET, NOW, BODY).unwrap();
        assert!(verify(SECRET, &h, BODY, NOW + 301, DEFAULT_TOLERANCE).is_err());
        assert!(verify(SECRET, &h, BODY, NOW - 301, DEFAULT_TOLERANCE).is_err());
        assert!(verify(SECRET, &h, BODY, NOW + 300, DEFAULT_TOLERANCE).is_ok());
    }

    #[test]
    fn test_rotated_secret_any_v1_matches() {
        let good = sign(SECRET, NOW, BODY).unwrap();
        let h = format!("t={NOW},v1=deadbeef,v1=not-hex,v1={good}");
        assert!(verify(SECRET, &h, BODY, NOW, DEFAULT_TOLERANCE).is_ok());
    }

    #[test]
    fn test_malformed_headers() {
        assert!(verify(SECRET, "", BODY, NOW, DEFAULT_TOLERANCE).is_err());
        assert!(verify(SECRET, "v1=abcd", BODY, NOW, DEFAULT_TOLERANCE).is_err());
        assert!(verify(SECRET, &format!("t={NOW}"), BODY, NOW, DEFAULT_TOLERANCE).is_err());
    }
}
