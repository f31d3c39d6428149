//! Postmark bounce webhooks
//!
//! Postmark authenticates with HTTP basic auth credentials configured on
//! the webhook, then posts one JSON document per bounce.

use base64::Engine;
use chrono::{DateTime, Utc};
use postroom_common::types::BounceType;
use postroom_common::{Error, Result};
use postroom_storage::models::Bounce;
use serde::Deserialize;

use super::constant_time_eq;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkPayload {
    #[serde(default)]
    record_type: String,

    #[serde(rename = "Type", default)]
    kind: String,

    #[serde(default)]
    email: String,

    #[serde(default)]
    bounced_at: String,
}

/// Postmark webhook verifier/parser
pub struct Postmark {
    username: String,
    password: String,
}

impl Postmark {
    /// Create a new Postmark handler
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Check the Authorization header against the configured credentials
    pub fn verify(&self, authorization: &str) -> Result<()> {
        if self.username.is_empty() && self.password.is_empty() {
            // No credentials configured means no auth required.
            return Ok(());
        }

        let encoded = authorization
            .strip_prefix("Basic ")
            .ok_or_else(|| Error::Auth("missing basic auth header".to_string()))?;

        let expected = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));

        if !constant_time_eq(encoded.as_bytes(), expected.as_bytes()) {
            return Err(Error::Auth("invalid webhook credentials".to_string()));
        }

        Ok(())
    }

    /// Parse a bounce payload
    pub fn process(&self, body: &[u8]) -> Result<Vec<Bounce>> {
        let payload: PostmarkPayload = serde_json::from_slice(body)
            .map_err(|e| Error::Webhook(format!("error parsing postmark payload: {}", e)))?;

        let bounce_type = match payload.record_type.as_str() {
            "Bounce" => match payload.kind.as_str() {
                "HardBounce" | "BadEmailAddress" | "ManuallyDeactivated" => BounceType::Hard,
                _ => BounceType::Soft,
            },
            "SpamComplaint" => BounceType::Complaint,
            other => {
                return Err(Error::Webhook(format!(
                    "unsupported postmark record type: {}",
                    other
                )))
            }
        };

        if payload.email.is_empty() {
            return Err(Error::Validation("postmark payload missing email".to_string()));
        }

        let created_at = DateTime::parse_from_rfc3339(&payload.bounced_at)
            .map(|t| t.with_timezone(&Utc))
            .ok();

        let meta: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();

        Ok(vec![Bounce {
            email: payload.email.to_lowercase(),
            subscriber_uuid: String::new(),
            subscriber_id: None,
            bounce_type,
            source: "postmark".to_string(),
            meta,
            created_at,
            campaign_uuid: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_basic_auth() {
        let pm = Postmark::new("hook", "s3cret");
        let good = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("hook:s3cret")
        );
        assert!(pm.verify(&good).is_ok());
        assert!(pm.verify("Basic d3Jvbmc6Y3JlZHM=").is_err());
        assert!(pm.verify("Bearer token").is_err());
        assert!(pm.verify("").is_err());

        // Auth disabled when no credentials are configured.
        assert!(Postmark::new("", "").verify("").is_ok());
    }

    #[test]
    fn test_process_hard_bounce() {
        let pm = Postmark::new("", "");
        let bounces = pm
            .process(
                br#"{
                    "RecordType": "Bounce",
                    "Type": "HardBounce",
                    "Email": "Gone@Example.com",
                    "BouncedAt": "2026-03-02T10:00:00Z",
                    "Description": "The server was unable to deliver your message"
                }"#,
            )
            .unwrap();

        assert_eq!(bounces.len(), 1);
        assert_eq!(bounces[0].email, "gone@example.com");
        assert_eq!(bounces[0].bounce_type, BounceType::Hard);
        assert!(bounces[0].created_at.is_some());
    }

    #[test]
    fn test_process_soft_and_complaint() {
        let pm = Postmark::new("", "");

        let soft = pm
            .process(br#"{"RecordType": "Bounce", "Type": "Transient", "Email": "a@b.c"}"#)
            .unwrap();
        assert_eq!(soft[0].bounce_type, BounceType::Soft);

        let complaint = pm
            .process(br#"{"RecordType": "SpamComplaint", "Email": "a@b.c"}"#)
            .unwrap();
        assert_eq!(complaint[0].bounce_type, BounceType::Complaint);
    }

    #[test]
    fn test_process_rejects_other_records() {
        let pm = Postmark::new("", "");
        assert!(pm
            .process(br#"{"RecordType": "Delivery", "Email": "a@b.c"}"#)
            .is_err());
        assert!(pm.process(br#"{"RecordType": "Bounce"}"#).is_err());
    }
}
