//! ForwardEmail bounce webhooks
//!
//! ForwardEmail signs the raw body with HMAC-SHA256 (hex) in the
//! X-Webhook-Signature header.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use postroom_common::types::BounceType;
use postroom_common::{Error, Result};
use postroom_storage::models::Bounce;
use serde::Deserialize;
use sha2::Sha256;

use super::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Deserialize)]
struct ForwardemailPayload {
    #[serde(default)]
    recipient: String,

    #[serde(default)]
    response_code: i32,

    #[serde(default)]
    bounced_at: String,
}

/// ForwardEmail webhook verifier/parser
pub struct Forwardemail {
    key: Vec<u8>,
}

impl Forwardemail {
    /// Create a new ForwardEmail handler
    pub fn new(key: &str) -> Self {
        Self {
            key: key.as_bytes().to_vec(),
        }
    }

    /// Verify the signature and parse the bounce payload
    pub fn process(&self, signature_hex: &str, body: &[u8]) -> Result<Vec<Bounce>> {
        self.verify(signature_hex, body)?;

        let payload: ForwardemailPayload = serde_json::from_slice(body)
            .map_err(|e| Error::Webhook(format!("error parsing forwardemail payload: {}", e)))?;

        if payload.recipient.is_empty() {
            return Err(Error::Validation(
                "forwardemail payload missing recipient".to_string(),
            ));
        }

        // 5xx responses are permanent failures; everything else is treated
        // as transient.
        let bounce_type = if payload.response_code >= 500 {
            BounceType::Hard
        } else {
            BounceType::Soft
        };

        let created_at = DateTime::parse_from_rfc3339(&payload.bounced_at)
            .map(|t| t.with_timezone(&Utc))
            .ok();

        let meta: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();

        Ok(vec![Bounce {
            email: payload.recipient.to_lowercase(),
            subscriber_uuid: String::new(),
            subscriber_id: None,
            bounce_type,
            source: "forwardemail".to_string(),
            meta,
            created_at,
            campaign_uuid: None,
        }])
    }

    fn verify(&self, signature_hex: &str, body: &[u8]) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::Auth("webhook key not configured".to_string()));
        }

        if signature_hex.is_empty() {
            return Err(Error::Auth("missing webhook signature".to_string()));
        }

        let expected = hex::decode(signature_hex)
            .map_err(|e| Error::Auth(format!("error decoding signature: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Auth(format!("invalid HMAC key: {}", e)))?;
        mac.update(body);
        let computed = mac.finalize().into_bytes();

        if !constant_time_eq(&computed, &expected) {
            return Err(Error::Auth("signature verification failed".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(key: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_process_hard_bounce() {
        let fe = Forwardemail::new("key123");
        let body = br#"{"recipient": "Gone@Example.com", "response_code": 550, "bounced_at": "2026-03-02T10:00:00Z"}"#;
        let sig = sign("key123", body);

        let bounces = fe.process(&sig, body).unwrap();
        assert_eq!(bounces[0].email, "gone@example.com");
        assert_eq!(bounces[0].bounce_type, BounceType::Hard);
    }

    #[test]
    fn test_process_soft_bounce() {
        let fe = Forwardemail::new("key123");
        let body = br#"{"recipient": "busy@example.com", "response_code": 421}"#;
        let sig = sign("key123", body);

        let bounces = fe.process(&sig, body).unwrap();
        assert_eq!(bounces[0].bounce_type, BounceType::Soft);
        assert!(bounces[0].created_at.is_none());
    }

    #[test]
    fn test_process_rejects_bad_signature() {
        let fe = Forwardemail::new("key123");
        let body = br#"{"recipient": "a@b.c", "response_code": 550}"#;

        assert!(fe.process(&sign("other-key", body), body).is_err());
        assert!(fe.process("", body).is_err());
        assert!(fe.process("zzzz", body).is_err());
        assert!(Forwardemail::new("").process(&sign("key123", body), body).is_err());
    }
}
