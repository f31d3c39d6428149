//! Database models

use chrono::{DateTime, NaiveDate, Utc};
use postroom_common::types::{BounceType, CampaignId, QueueItemId, SubscriberId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Queue item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Sending,
    Sent,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Sending => "sending",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "sending" => Ok(QueueStatus::Sending),
            "sent" => Ok(QueueStatus::Sent),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(format!("unknown queue status: {}", other)),
        }
    }
}

/// One message awaiting delivery
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub status: String,
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub assigned_smtp_server_uuid: Option<String>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Queue item joined with campaign/subscriber details for listings
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueueItemDetail {
    pub id: QueueItemId,
    pub campaign_id: CampaignId,
    pub campaign_name: String,
    pub campaign_uuid: uuid::Uuid,
    pub subscriber_id: SubscriberId,
    pub subscriber_email: String,
    pub subscriber_uuid: uuid::Uuid,
    pub status: String,
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub assigned_smtp_server_uuid: Option<String>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub total: i64,
}

/// Per (server, day) usage counter
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ServerDailyUsage {
    pub id: i64,
    pub smtp_server_uuid: String,
    pub usage_date: NaiveDate,
    pub emails_sent: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sliding window counter per server
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ServerWindowState {
    pub id: i64,
    pub smtp_server_uuid: String,
    pub window_start: DateTime<Utc>,
    pub emails_in_window: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account-wide minute/hour counters (single row)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AccountWindowState {
    pub minute_window_start: DateTime<Utc>,
    pub emails_in_minute: i32,
    pub hour_window_start: DateTime<Utc>,
    pub emails_in_hour: i32,
}

/// Maps a provider message id back to (campaign, subscriber)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MessageTracking {
    pub id: i64,
    pub provider_message_id: String,
    pub internet_message_id: Option<String>,
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub sent_at: DateTime<Utc>,
}

/// Provider terminal-state report
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DeliveryEvent {
    pub id: i64,
    pub provider_message_id: String,
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub status: String,
    pub status_reason: Option<String>,
    pub details: serde_json::Value,
    pub event_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a delivery event
#[derive(Debug, Clone)]
pub struct NewDeliveryEvent {
    pub provider_message_id: String,
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub status: String,
    pub status_reason: Option<String>,
    pub details: serde_json::Value,
    pub event_timestamp: DateTime<Utc>,
}

/// Open/click report from the provider
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EngagementEvent {
    pub id: i64,
    pub provider_message_id: String,
    pub internet_message_id: Option<String>,
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub engagement_type: String,
    pub engagement_context: Option<String>,
    pub user_agent: Option<String>,
    pub event_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for recording an engagement event
#[derive(Debug, Clone)]
pub struct NewEngagementEvent {
    pub provider_message_id: String,
    pub internet_message_id: Option<String>,
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub engagement_type: String,
    pub engagement_context: Option<String>,
    pub user_agent: Option<String>,
    pub event_timestamp: DateTime<Utc>,
}

/// Raw inbound webhook trace
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WebhookLog {
    pub id: i64,
    pub webhook_type: String,
    pub event_type: Option<String>,
    pub headers: serde_json::Value,
    pub body: String,
    pub response_status: i32,
    pub processed: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for a webhook log entry
#[derive(Debug, Clone)]
pub struct NewWebhookLog {
    pub webhook_type: String,
    pub event_type: Option<String>,
    pub headers: serde_json::Value,
    pub body: String,
    pub response_status: i32,
    pub processed: bool,
    pub error: Option<String>,
}

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Finished,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Finished => "finished",
            CampaignStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign model (authoring fields live elsewhere; the queue cares about
/// status and the auto-pause markers)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub uuid: uuid::Uuid,
    pub name: String,
    pub status: String,
    pub use_queue: bool,
    pub auto_paused: bool,
    pub auto_paused_at: Option<DateTime<Utc>>,
    pub queue_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A bounce report heading for the recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bounce {
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub subscriber_uuid: String,

    #[serde(skip_deserializing)]
    pub subscriber_id: Option<SubscriberId>,

    #[serde(rename = "type")]
    pub bounce_type: BounceType,

    #[serde(default)]
    pub source: String,

    #[serde(default = "empty_meta")]
    pub meta: serde_json::Value,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(skip_deserializing)]
    pub campaign_uuid: Option<String>,
}

fn empty_meta() -> serde_json::Value {
    serde_json::json!({})
}

/// Scheduler output for one queue item
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleAssignment {
    pub item_id: QueueItemId,
    pub scheduled_at: DateTime<Utc>,
    pub smtp_server_uuid: String,
}

/// Queue summary statistics
#[derive(Debug, Clone, Default, FromRow, Serialize)]
pub struct QueueStats {
    pub queued: i64,
    pub sending: i64,
    pub sent: i64,
    pub failed: i64,
    pub cancelled: i64,
    #[sqlx(default)]
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

/// Counts returned when the queue is cleared
#[derive(Debug, Clone, Default, FromRow, Serialize)]
pub struct ClearCounts {
    pub queued: i64,
    pub cancelled: i64,
    pub sent: i64,
    pub failed: i64,
}

/// One SMTP server from the settings store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpServer {
    pub uuid: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub from_email: String,

    #[serde(default)]
    pub tls: bool,

    /// 0 means unlimited
    #[serde(default)]
    pub daily_limit: i32,

    #[serde(default)]
    pub sliding_window: bool,

    /// Duration string, e.g. "30m"
    #[serde(default)]
    pub sliding_window_duration: String,

    #[serde(default)]
    pub sliding_window_rate: i32,
}

fn default_smtp_port() -> u16 {
    587
}

impl SmtpServer {
    /// Parsed sliding window duration, when one is configured
    pub fn window_duration(&self) -> Option<Duration> {
        parse_duration(&self.sliding_window_duration)
    }
}

/// Runtime settings aggregated from the key/value settings store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "app.concurrency", default)]
    pub concurrency: i32,

    /// Messages per second per worker; 0 disables the cap
    #[serde(rename = "app.message_rate", default)]
    pub message_rate: i32,

    #[serde(rename = "app.account_rate_limit_per_minute", default)]
    pub account_rate_limit_per_minute: i32,

    #[serde(rename = "app.account_rate_limit_per_hour", default)]
    pub account_rate_limit_per_hour: i32,

    #[serde(rename = "app.message_sliding_window", default)]
    pub sliding_window: bool,

    #[serde(rename = "app.message_sliding_window_duration", default)]
    pub sliding_window_duration: String,

    #[serde(rename = "app.message_sliding_window_rate", default)]
    pub sliding_window_rate: i32,

    #[serde(rename = "app.timezone", default = "default_timezone")]
    pub timezone: String,

    /// "HH:MM" in the configured timezone; empty disables the window
    #[serde(rename = "app.time_window_start", default)]
    pub time_window_start: String,

    #[serde(rename = "app.time_window_end", default)]
    pub time_window_end: String,

    #[serde(rename = "app.smart_sending_enabled", default)]
    pub smart_sending_enabled: bool,

    #[serde(rename = "app.smart_sending_period_hours", default)]
    pub smart_sending_period_hours: i32,

    #[serde(rename = "app.queue_paused", default)]
    pub queue_paused: bool,

    #[serde(rename = "smtp", default)]
    pub smtp: Vec<SmtpServer>,

    #[serde(rename = "bounce.ses_enabled", default)]
    pub bounce_ses_enabled: bool,

    #[serde(rename = "bounce.sendgrid_enabled", default)]
    pub bounce_sendgrid_enabled: bool,

    #[serde(rename = "bounce.sendgrid_key", default)]
    pub bounce_sendgrid_key: String,

    #[serde(rename = "bounce.postmark_enabled", default)]
    pub bounce_postmark_enabled: bool,

    #[serde(rename = "bounce.postmark_username", default)]
    pub bounce_postmark_username: String,

    #[serde(rename = "bounce.postmark_password", default)]
    pub bounce_postmark_password: String,

    #[serde(rename = "bounce.forwardemail_enabled", default)]
    pub bounce_forwardemail_enabled: bool,

    #[serde(rename = "bounce.forwardemail_key", default)]
    pub bounce_forwardemail_key: String,

    #[serde(rename = "bounce.azure_enabled", default)]
    pub bounce_azure_enabled: bool,

    #[serde(rename = "shopify.webhook_secret", default)]
    pub shopify_webhook_secret: String,

    #[serde(rename = "shopify.attribution_window_days", default)]
    pub shopify_attribution_window_days: i32,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Settings {
    /// Parsed global sliding window duration, when enabled and valid
    pub fn window_duration(&self) -> Option<Duration> {
        if !self.sliding_window {
            return None;
        }
        parse_duration(&self.sliding_window_duration)
    }
}

/// Parses duration strings of the form "90s", "30m", "1h" or combinations
/// like "1h30m". Returns None for empty or malformed input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let value: u64 = digits.parse().ok()?;
        digits.clear();

        let unit = match c {
            's' => Duration::from_secs(value),
            'm' => Duration::from_secs(value * 60),
            'h' => Duration::from_secs(value * 3600),
            _ => return None,
        };
        total += unit;
    }

    // Trailing digits without a unit.
    if !digits.is_empty() {
        return None;
    }

    if total.is_zero() {
        None
    } else {
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_status_round_trip() {
        for s in ["queued", "sending", "sent", "failed", "cancelled"] {
            assert_eq!(s.parse::<QueueStatus>().unwrap().as_str(), s);
        }
        assert!("pending".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("30"), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("0m"), None);
    }

    #[test]
    fn test_settings_from_aggregated_json() {
        let raw = serde_json::json!({
            "app.concurrency": 4,
            "app.message_rate": 2,
            "app.account_rate_limit_per_minute": 30,
            "app.account_rate_limit_per_hour": 0,
            "app.timezone": "America/New_York",
            "app.time_window_start": "08:00",
            "app.time_window_end": "20:00",
            "app.queue_paused": false,
            "app.message_sliding_window": true,
            "app.message_sliding_window_duration": "30m",
            "app.message_sliding_window_rate": 100,
            "smtp": [{
                "uuid": "6ba7b810-9dad-11d1-80b4-00c04fd430c8",
                "name": "primary",
                "enabled": true,
                "host": "smtp.example.com",
                "from_email": "news@example.com",
                "daily_limit": 500,
                "sliding_window": true,
                "sliding_window_duration": "10m",
                "sliding_window_rate": 50
            }],
            "bounce.azure_enabled": true
        });

        let settings: Settings = serde_json::from_value(raw).unwrap();
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.account_rate_limit_per_minute, 30);
        assert_eq!(settings.timezone, "America/New_York");
        assert_eq!(settings.window_duration(), Some(Duration::from_secs(1800)));
        assert!(settings.bounce_azure_enabled);
        assert!(!settings.bounce_ses_enabled);

        let server = &settings.smtp[0];
        assert_eq!(server.daily_limit, 500);
        assert_eq!(server.port, 587);
        assert_eq!(server.window_duration(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_bounce_deserialize_native_payload() {
        let raw = r#"{
            "email": "User@Example.com",
            "type": "hard",
            "source": "native",
            "meta": {"reason": "mailbox full"}
        }"#;

        let bounce: Bounce = serde_json::from_str(raw).unwrap();
        assert_eq!(bounce.email, "User@Example.com");
        assert_eq!(bounce.bounce_type, BounceType::Hard);
        assert!(bounce.created_at.is_none());
        assert_eq!(bounce.meta["reason"], "mailbox full");
    }
}
