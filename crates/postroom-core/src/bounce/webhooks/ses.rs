//! Amazon SES bounce notifications via SNS
//!
//! SNS wraps SES notifications in an envelope. Subscription confirmations
//! are acknowledged by fetching the SubscribeURL; bounce notifications
//! carry the SES report as a JSON string in the Message field.

use chrono::{DateTime, Utc};
use postroom_common::types::BounceType;
use postroom_common::{Error, Result};
use postroom_storage::models::Bounce;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SnsEnvelope {
    #[serde(rename = "Type", default)]
    kind: String,

    #[serde(default)]
    message: String,

    #[serde(rename = "SubscribeURL", default)]
    subscribe_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesNotification {
    #[serde(default)]
    notification_type: String,

    #[serde(default)]
    bounce: Option<SesBounce>,

    #[serde(default)]
    complaint: Option<SesComplaint>,

    #[serde(default)]
    mail: Option<SesMail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesBounce {
    #[serde(default)]
    bounce_type: String,

    #[serde(default)]
    bounced_recipients: Vec<SesRecipient>,

    #[serde(default)]
    timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesComplaint {
    #[serde(default)]
    complained_recipients: Vec<SesRecipient>,

    #[serde(default)]
    timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesRecipient {
    #[serde(default)]
    email_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesMail {
    #[serde(default)]
    timestamp: String,
}

/// SES/SNS webhook handler
pub struct Ses {
    client: reqwest::Client,
}

impl Ses {
    /// Create a new SES handler
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Confirm an SNS subscription by fetching its SubscribeURL
    pub async fn process_subscription(&self, body: &[u8]) -> Result<()> {
        let envelope: SnsEnvelope = serde_json::from_slice(body)
            .map_err(|e| Error::Webhook(format!("error parsing SNS envelope: {}", e)))?;

        if envelope.subscribe_url.is_empty() {
            return Err(Error::Webhook("SNS envelope missing SubscribeURL".to_string()));
        }

        self.client
            .get(&envelope.subscribe_url)
            .send()
            .await
            .map_err(|e| Error::Webhook(format!("error confirming SNS subscription: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::Webhook(format!("SNS subscription confirmation failed: {}", e)))?;

        info!("confirmed SNS subscription");
        Ok(())
    }

    /// Parse a bounce/complaint notification
    pub fn process_bounce(&self, body: &[u8]) -> Result<Vec<Bounce>> {
        let envelope: SnsEnvelope = serde_json::from_slice(body)
            .map_err(|e| Error::Webhook(format!("error parsing SNS envelope: {}", e)))?;

        if envelope.kind != "Notification" {
            return Err(Error::Webhook(format!(
                "unexpected SNS message type: {}",
                envelope.kind
            )));
        }

        let notification: SesNotification = serde_json::from_str(&envelope.message)
            .map_err(|e| Error::Webhook(format!("error parsing SES notification: {}", e)))?;

        let meta: serde_json::Value =
            serde_json::from_str(&envelope.message).unwrap_or_default();
        let mail_timestamp = notification
            .mail
            .as_ref()
            .map(|m| m.timestamp.clone())
            .unwrap_or_default();

        let mut bounces = Vec::new();

        match notification.notification_type.as_str() {
            "Bounce" => {
                let bounce = notification
                    .bounce
                    .ok_or_else(|| Error::Webhook("notification missing bounce body".to_string()))?;

                // "Permanent" is a hard failure; "Transient" and
                // "Undetermined" are retried by the receiver.
                let bounce_type = if bounce.bounce_type == "Permanent" {
                    BounceType::Hard
                } else {
                    BounceType::Soft
                };

                let created_at = parse_timestamp(&bounce.timestamp, &mail_timestamp);
                for recipient in &bounce.bounced_recipients {
                    if recipient.email_address.is_empty() {
                        continue;
                    }
                    bounces.push(make_bounce(
                        &recipient.email_address,
                        bounce_type,
                        meta.clone(),
                        created_at,
                    ));
                }
            }
            "Complaint" => {
                let complaint = notification.complaint.ok_or_else(|| {
                    Error::Webhook("notification missing complaint body".to_string())
                })?;

                let created_at = parse_timestamp(&complaint.timestamp, &mail_timestamp);
                for recipient in &complaint.complained_recipients {
                    if recipient.email_address.is_empty() {
                        continue;
                    }
                    bounces.push(make_bounce(
                        &recipient.email_address,
                        BounceType::Complaint,
                        meta.clone(),
                        created_at,
                    ));
                }
            }
            other => {
                return Err(Error::Webhook(format!(
                    "unsupported SES notification type: {}",
                    other
                )))
            }
        }

        Ok(bounces)
    }
}

impl Default for Ses {
    fn default() -> Self {
        Self::new()
    }
}

fn make_bounce(
    email: &str,
    bounce_type: BounceType,
    meta: serde_json::Value,
    created_at: Option<DateTime<Utc>>,
) -> Bounce {
    Bounce {
        email: email.to_lowercase(),
        subscriber_uuid: String::new(),
        subscriber_id: None,
        bounce_type,
        source: "ses".to_string(),
        meta,
        created_at,
        campaign_uuid: None,
    }
}

fn parse_timestamp(primary: &str, fallback: &str) -> Option<DateTime<Utc>> {
    for raw in [primary, fallback] {
        if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
            return Some(t.with_timezone(&Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_permanent_bounce() {
        let message = serde_json::json!({
            "notificationType": "Bounce",
            "bounce": {
                "bounceType": "Permanent",
                "bouncedRecipients": [{"emailAddress": "Gone@Example.com"}],
                "timestamp": "2026-03-02T10:00:00.000Z"
            },
            "mail": {"timestamp": "2026-03-02T09:59:58.000Z"}
        });
        let body = serde_json::json!({
            "Type": "Notification",
            "Message": message.to_string()
        });

        let ses = Ses::new();
        let bounces = ses.process_bounce(body.to_string().as_bytes()).unwrap();
        assert_eq!(bounces.len(), 1);
        assert_eq!(bounces[0].email, "gone@example.com");
        assert_eq!(bounces[0].bounce_type, BounceType::Hard);
        assert!(bounces[0].created_at.is_some());
    }

    #[test]
    fn test_process_transient_bounce_and_complaint() {
        let ses = Ses::new();

        let message = serde_json::json!({
            "notificationType": "Bounce",
            "bounce": {
                "bounceType": "Transient",
                "bouncedRecipients": [{"emailAddress": "full@example.com"}]
            }
        });
        let body = serde_json::json!({"Type": "Notification", "Message": message.to_string()});
        let bounces = ses.process_bounce(body.to_string().as_bytes()).unwrap();
        assert_eq!(bounces[0].bounce_type, BounceType::Soft);

        let message = serde_json::json!({
            "notificationType": "Complaint",
            "complaint": {
                "complainedRecipients": [{"emailAddress": "angry@example.com"}]
            }
        });
        let body = serde_json::json!({"Type": "Notification", "Message": message.to_string()});
        let bounces = ses.process_bounce(body.to_string().as_bytes()).unwrap();
        assert_eq!(bounces[0].bounce_type, BounceType::Complaint);
    }

    #[test]
    fn test_process_rejects_other_envelopes() {
        let ses = Ses::new();
        assert!(ses
            .process_bounce(br#"{"Type": "SubscriptionConfirmation", "Message": "{}"}"#)
            .is_err());
        assert!(ses.process_bounce(b"not json").is_err());
    }
}
