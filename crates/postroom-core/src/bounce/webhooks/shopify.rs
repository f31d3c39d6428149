//! Shopify order webhooks
//!
//! Shopify signs each webhook with a base64-encoded HMAC-SHA256 of the raw
//! body in the X-Shopify-Hmac-Sha256 header.

use base64::Engine;
use hmac::{Hmac, Mac};
use postroom_common::{Error, Result};
use serde::Deserialize;
use sha2::Sha256;

use super::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

/// The order fields purchase attribution cares about
#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyOrder {
    pub id: i64,

    #[serde(default)]
    pub order_number: i64,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub total_price: String,

    #[serde(default)]
    pub currency: String,

    #[serde(default)]
    pub created_at: String,

    #[serde(default)]
    pub landing_site: String,
}

/// Shopify webhook verifier/parser
pub struct Shopify {
    webhook_secret: String,
}

impl Shopify {
    /// Create a new Shopify handler
    pub fn new(webhook_secret: &str) -> Self {
        Self {
            webhook_secret: webhook_secret.to_string(),
        }
    }

    /// Verify the HMAC header against the raw request body
    pub fn verify(&self, hmac_header: &str, body: &[u8]) -> Result<()> {
        if self.webhook_secret.is_empty() {
            return Err(Error::Auth("webhook secret not configured".to_string()));
        }

        if hmac_header.is_empty() {
            return Err(Error::Auth("missing HMAC header".to_string()));
        }

        let expected = base64::engine::general_purpose::STANDARD
            .decode(hmac_header)
            .map_err(|e| Error::Auth(format!("error decoding HMAC: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|e| Error::Auth(format!("invalid HMAC key: {}", e)))?;
        mac.update(body);
        let computed = mac.finalize().into_bytes();

        if !constant_time_eq(&computed, &expected) {
            return Err(Error::Auth("HMAC verification failed".to_string()));
        }

        Ok(())
    }

    /// Parse an order payload
    pub fn parse_order(&self, body: &[u8]) -> Result<ShopifyOrder> {
        let order: ShopifyOrder = serde_json::from_slice(body)
            .map_err(|e| Error::Webhook(format!("error parsing order JSON: {}", e)))?;

        if order.email.is_empty() {
            return Err(Error::Validation("order missing email address".to_string()));
        }

        if order.id == 0 {
            return Err(Error::Validation("order missing ID".to_string()));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_verify_valid_signature() {
        let body = br#"{"id": 42, "email": "buyer@example.com"}"#;
        let shopify = Shopify::new("shhh");
        let header = sign("shhh", body);
        assert!(shopify.verify(&header, body).is_ok());
    }

    #[test]
    fn test_verify_rejects_bad_signature() {
        let body = br#"{"id": 42}"#;
        let shopify = Shopify::new("shhh");
        let header = sign("wrong-secret", body);
        assert!(shopify.verify(&header, body).is_err());
    }

    #[test]
    fn test_verify_rejects_missing_pieces() {
        let shopify = Shopify::new("shhh");
        assert!(shopify.verify("", b"body").is_err());
        assert!(Shopify::new("").verify("sig", b"body").is_err());
        assert!(shopify.verify("not-base64!!!", b"body").is_err());
    }

    #[test]
    fn test_parse_order() {
        let shopify = Shopify::new("shhh");
        let order = shopify
            .parse_order(
                br#"{
                    "id": 820982911946154508,
                    "order_number": 1234,
                    "email": "buyer@example.com",
                    "total_price": "254.98",
                    "currency": "USD",
                    "landing_site": "/?utm_source=newsletter"
                }"#,
            )
            .unwrap();

        assert_eq!(order.order_number, 1234);
        assert_eq!(order.total_price, "254.98");
    }

    #[test]
    fn test_parse_order_requires_email_and_id() {
        let shopify = Shopify::new("shhh");
        assert!(shopify.parse_order(br#"{"id": 1}"#).is_err());
        assert!(shopify
            .parse_order(br#"{"id": 0, "email": "a@b.c"}"#)
            .is_err());
        assert!(shopify.parse_order(b"not json").is_err());
    }
}
