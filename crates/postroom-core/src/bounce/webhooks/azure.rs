//! Azure Communication Services Event Grid payloads
//!
//! Event Grid posts a JSON array of envelopes. Three event types matter:
//! the subscription validation handshake, delivery reports and engagement
//! (open/click) reports. Authenticity comes from the validation handshake
//! and network ACLs; there is no per-request signature.

use chrono::{DateTime, Utc};
use postroom_common::types::BounceType;
use postroom_common::{Error, Result};
use postroom_storage::models::Bounce;
use serde::{Deserialize, Serialize};

/// Subscription validation handshake
pub const EVENT_TYPE_VALIDATION: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";
/// Delivery report
pub const EVENT_TYPE_DELIVERY: &str = "Microsoft.Communication.EmailDeliveryReportReceived";
/// Engagement (view/click) report
pub const EVENT_TYPE_ENGAGEMENT: &str =
    "Microsoft.Communication.EmailEngagementTrackingReportReceived";

/// Envelope shared by all Event Grid events
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGridEvent {
    #[serde(default)]
    pub id: String,

    pub event_type: String,

    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of the validation handshake
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationData {
    pub validation_code: String,
}

/// Response Event Grid expects for a successful handshake
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub validation_response: String,
}

/// Delivery report payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryData {
    pub sender: String,
    pub recipient: String,
    pub message_id: String,
    pub internet_message_id: String,
    pub status: String,
    pub delivery_status_details: Option<serde_json::Value>,
    pub delivery_attempt_time_stamp: String,
}

/// Engagement report payload. Recipient may be empty on multi-recipient
/// sends; engagement_context carries the clicked URL.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngagementData {
    pub sender: String,
    pub recipient: String,
    pub message_id: String,
    pub internet_message_id: String,
    pub user_action_time_stamp: String,
    pub engagement_context: String,
    pub user_agent: String,
    pub engagement_type: String,

    /// Campaign/subscriber UUIDs from preserved custom headers, when the
    /// provider passes them through.
    #[serde(alias = "campaignUuid")]
    pub campaign_uuid: String,
    #[serde(alias = "subscriberUuid")]
    pub subscriber_uuid: String,
}

/// What a delivery status means for record-keeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Record the delivery event, nothing else
    DeliveredOnly,
    /// Distribution list expansion; nothing to record
    Ignore,
    /// Record the delivery event and a bounce of the given type
    Bounce(BounceType),
    /// Unrecognized status; log and skip
    Unknown,
}

/// Map an Azure delivery status to its disposition
pub fn disposition(status: &str) -> Disposition {
    match status {
        "Delivered" => Disposition::DeliveredOnly,
        "Expanded" => Disposition::Ignore,
        "Bounced" | "Failed" | "Suppressed" => Disposition::Bounce(BounceType::Hard),
        "Quarantined" => Disposition::Bounce(BounceType::Soft),
        "FilteredSpam" => Disposition::Bounce(BounceType::Complaint),
        _ => Disposition::Unknown,
    }
}

/// Parse the envelope array
pub fn parse_events(body: &[u8]) -> Result<Vec<EventGridEvent>> {
    serde_json::from_slice(body)
        .map_err(|e| Error::Webhook(format!("error parsing Event Grid payload: {}", e)))
}

/// Answer the subscription validation handshake from the first envelope
pub fn validation_response(events: &[EventGridEvent]) -> Result<ValidationResponse> {
    let event = events
        .iter()
        .find(|e| e.event_type == EVENT_TYPE_VALIDATION)
        .ok_or_else(|| Error::Webhook("no validation event in payload".to_string()))?;

    let data: ValidationData = serde_json::from_value(event.data.clone())
        .map_err(|e| Error::Webhook(format!("error parsing validation event: {}", e)))?;

    Ok(ValidationResponse {
        validation_response: data.validation_code,
    })
}

/// Parse a delivery report payload
pub fn parse_delivery(data: &serde_json::Value) -> Result<DeliveryData> {
    serde_json::from_value(data.clone())
        .map_err(|e| Error::Webhook(format!("error parsing delivery report: {}", e)))
}

/// Parse an engagement report payload
pub fn parse_engagement(data: &serde_json::Value) -> Result<EngagementData> {
    serde_json::from_value(data.clone())
        .map_err(|e| Error::Webhook(format!("error parsing engagement report: {}", e)))
}

/// Event timestamp from an RFC 3339 string, falling back to now
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Build the bounce record for a failed delivery. Correlation fields are
/// filled in by the correlator once the lookup has run.
pub fn bounce_from_delivery(data: &DeliveryData, bounce_type: BounceType, raw: &serde_json::Value) -> Bounce {
    Bounce {
        email: data.recipient.to_lowercase(),
        subscriber_uuid: String::new(),
        subscriber_id: None,
        bounce_type,
        source: "azure".to_string(),
        meta: raw.clone(),
        created_at: Some(parse_timestamp(&data.delivery_attempt_time_stamp)),
        campaign_uuid: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_mapping() {
        assert_eq!(disposition("Delivered"), Disposition::DeliveredOnly);
        assert_eq!(disposition("Expanded"), Disposition::Ignore);
        assert_eq!(disposition("Bounced"), Disposition::Bounce(BounceType::Hard));
        assert_eq!(disposition("Failed"), Disposition::Bounce(BounceType::Hard));
        assert_eq!(
            disposition("Suppressed"),
            Disposition::Bounce(BounceType::Hard)
        );
        assert_eq!(
            disposition("Quarantined"),
            Disposition::Bounce(BounceType::Soft)
        );
        assert_eq!(
            disposition("FilteredSpam"),
            Disposition::Bounce(BounceType::Complaint)
        );
        assert_eq!(disposition("SomethingNew"), Disposition::Unknown);
    }

    #[test]
    fn test_validation_handshake() {
        let body = br#"[{
            "id": "2d1781af-3a4c",
            "eventType": "Microsoft.EventGrid.SubscriptionValidationEvent",
            "data": {
                "validationCode": "512d38b6-c7b8-40c8-89fe-f46f9e9622b6",
                "validationUrl": "https://rp-eastus2.eventgrid.azure.net/..."
            }
        }]"#;

        let events = parse_events(body).unwrap();
        let resp = validation_response(&events).unwrap();
        assert_eq!(resp.validation_response, "512d38b6-c7b8-40c8-89fe-f46f9e9622b6");
    }

    #[test]
    fn test_validation_missing_event() {
        let events = parse_events(br#"[{"eventType": "Other", "data": {}}]"#).unwrap();
        assert!(validation_response(&events).is_err());
    }

    #[test]
    fn test_parse_delivery_report() {
        let data = serde_json::json!({
            "sender": "news@example.com",
            "recipient": "User@Example.org",
            "messageId": "11111111-2222-3333-4444-555555555555",
            "internetMessageId": "<abc@example.com>",
            "status": "Bounced",
            "deliveryStatusDetails": {"statusMessage": "550 user unknown"},
            "deliveryAttemptTimeStamp": "2026-03-02T12:30:45Z"
        });

        let parsed = parse_delivery(&data).unwrap();
        assert_eq!(parsed.message_id, "11111111-2222-3333-4444-555555555555");
        assert_eq!(parsed.status, "Bounced");

        let bounce = bounce_from_delivery(&parsed, BounceType::Hard, &data);
        assert_eq!(bounce.email, "user@example.org");
        assert_eq!(bounce.source, "azure");
        assert_eq!(
            bounce.created_at.unwrap(),
            "2026-03-02T12:30:45Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_parse_engagement_report() {
        let data = serde_json::json!({
            "messageId": "aaa",
            "internetMessageId": "<abc@example.com>",
            "userActionTimeStamp": "2026-03-02T13:00:00Z",
            "engagementContext": "https://example.com/offer",
            "userAgent": "Mozilla/5.0",
            "engagementType": "click"
        });

        let parsed = parse_engagement(&data).unwrap();
        assert_eq!(parsed.engagement_type, "click");
        assert_eq!(parsed.engagement_context, "https://example.com/offer");
        assert!(parsed.campaign_uuid.is_empty());
    }

    #[test]
    fn test_parse_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let parsed = parse_timestamp("not a timestamp");
        assert!(parsed >= before);
    }
}
