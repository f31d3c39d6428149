//! SendGrid event webhooks
//!
//! SendGrid's signed event webhook carries an Ed25519 signature over
//! timestamp + body in the X-Twilio-Email-Event-Webhook-Signature and
//! -Timestamp headers; the verification key is configured per account.

use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use postroom_common::types::BounceType;
use postroom_common::{Error, Result};
use postroom_storage::models::Bounce;
use serde::Deserialize;

/// One entry of the event array SendGrid posts
#[derive(Debug, Clone, Deserialize)]
struct SendgridEvent {
    #[serde(default)]
    email: String,

    #[serde(default)]
    event: String,

    /// Set to "blocked" on soft bounces
    #[serde(rename = "type", default)]
    kind: String,

    #[serde(default)]
    timestamp: i64,

    #[serde(default)]
    reason: String,
}

/// SendGrid webhook verifier/parser
pub struct Sendgrid {
    key: VerifyingKey,
}

impl Sendgrid {
    /// Create a handler from the base64-encoded public verification key
    pub fn new(base64_public_key: &str) -> Result<Self> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(base64_public_key.trim())
            .map_err(|e| Error::Config(format!("invalid sendgrid key encoding: {}", e)))?;

        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| Error::Config("sendgrid key must be 32 bytes".to_string()))?;

        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| Error::Config(format!("invalid sendgrid key: {}", e)))?;

        Ok(Self { key })
    }

    /// Verify the signature and parse bounce-relevant events
    pub fn process(
        &self,
        signature_b64: &str,
        timestamp: &str,
        body: &[u8],
    ) -> Result<Vec<Bounce>> {
        self.verify(signature_b64, timestamp, body)?;

        let events: Vec<SendgridEvent> = serde_json::from_slice(body)
            .map_err(|e| Error::Webhook(format!("error parsing sendgrid events: {}", e)))?;

        let raw: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();

        let mut bounces = Vec::new();
        for (i, event) in events.iter().enumerate() {
            let bounce_type = match event.event.as_str() {
                "bounce" if event.kind == "blocked" => BounceType::Soft,
                "bounce" | "dropped" => BounceType::Hard,
                "spamreport" => BounceType::Complaint,
                _ => continue,
            };

            if event.email.is_empty() {
                continue;
            }

            let created_at = DateTime::<Utc>::from_timestamp(event.timestamp, 0);

            bounces.push(Bounce {
                email: event.email.to_lowercase(),
                subscriber_uuid: String::new(),
                subscriber_id: None,
                bounce_type,
                source: "sendgrid".to_string(),
                meta: raw.get(i).cloned().unwrap_or_else(|| {
                    serde_json::json!({"reason": event.reason})
                }),
                created_at,
                campaign_uuid: None,
            });
        }

        Ok(bounces)
    }

    fn verify(&self, signature_b64: &str, timestamp: &str, body: &[u8]) -> Result<()> {
        if signature_b64.is_empty() || timestamp.is_empty() {
            return Err(Error::Auth("missing sendgrid signature headers".to_string()));
        }

        let raw = base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|e| Error::Auth(format!("error decoding signature: {}", e)))?;

        let signature = Signature::from_slice(&raw)
            .map_err(|e| Error::Auth(format!("malformed signature: {}", e)))?;

        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);

        self.key
            .verify(&message, &signature)
            .map_err(|_| Error::Auth("sendgrid signature verification failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn keypair() -> (SigningKey, String) {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let public = base64::engine::general_purpose::STANDARD
            .encode(signing.verifying_key().to_bytes());
        (signing, public)
    }

    fn sign(signing: &SigningKey, timestamp: &str, body: &[u8]) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        base64::engine::general_purpose::STANDARD.encode(signing.sign(&message).to_bytes())
    }

    #[test]
    fn test_process_verified_events() {
        let (signing, public) = keypair();
        let handler = Sendgrid::new(&public).unwrap();

        let body = br#"[
            {"email": "Gone@Example.com", "event": "bounce", "timestamp": 1767349200, "reason": "550 unknown"},
            {"email": "busy@example.com", "event": "bounce", "type": "blocked", "timestamp": 1767349201},
            {"email": "angry@example.com", "event": "spamreport", "timestamp": 1767349202},
            {"email": "fine@example.com", "event": "delivered", "timestamp": 1767349203}
        ]"#;
        let ts = "1767349204";
        let sig = sign(&signing, ts, body);

        let bounces = handler.process(&sig, ts, body).unwrap();
        assert_eq!(bounces.len(), 3);
        assert_eq!(bounces[0].email, "gone@example.com");
        assert_eq!(bounces[0].bounce_type, BounceType::Hard);
        assert_eq!(bounces[1].bounce_type, BounceType::Soft);
        assert_eq!(bounces[2].bounce_type, BounceType::Complaint);
        assert_eq!(bounces[2].source, "sendgrid");
    }

    #[test]
    fn test_process_rejects_tampered_body() {
        let (signing, public) = keypair();
        let handler = Sendgrid::new(&public).unwrap();

        let body = br#"[{"email": "a@b.c", "event": "bounce", "timestamp": 1}]"#;
        let sig = sign(&signing, "100", body);

        assert!(handler.process(&sig, "100", b"[]").is_err());
        assert!(handler.process(&sig, "101", body).is_err());
        assert!(handler.process("", "100", body).is_err());
    }

    #[test]
    fn test_new_rejects_bad_keys() {
        assert!(Sendgrid::new("not base64!!").is_err());
        assert!(Sendgrid::new(&base64::engine::general_purpose::STANDARD.encode([1u8; 16])).is_err());
    }
}
