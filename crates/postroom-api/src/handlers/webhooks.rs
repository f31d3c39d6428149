//! Inbound webhook handlers
//!
//! One endpoint per provider, all funneling into the bounce channel and the
//! webhook log. Every request is logged regardless of outcome; providers
//! must see a 200 for record-level failures so they do not retry forever,
//! while signature failures get a 401 and parse failures a 400.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use postroom_common::Error;
use postroom_core::bounce::webhooks::{azure, forwardemail, postmark, sendgrid, ses, shopify};
use postroom_storage::models::{Bounce, NewWebhookLog, Settings};
use postroom_storage::repository::{SettingsRepository, WebhookLogRepository};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::state::AppState;

/// POST /api/webhooks/bounce
pub async fn bounce_webhook_native(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_bounce(state, String::new(), headers, body).await
}

/// POST /api/webhooks/bounce/:service
pub async fn bounce_webhook_service(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_bounce(state, service, headers, body).await
}

/// What one provider dispatch produced
struct Dispatch {
    bounces: Vec<Bounce>,
    event_type: Option<String>,
    /// A body that short-circuits the normal `{"success": true}` response
    /// (the Azure validation handshake).
    response_override: Option<serde_json::Value>,
}

impl Dispatch {
    fn bounces(bounces: Vec<Bounce>) -> Self {
        Self {
            bounces,
            event_type: None,
            response_override: None,
        }
    }
}

async fn handle_bounce(
    state: Arc<AppState>,
    service: String,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let webhook_type = if service.is_empty() {
        "native".to_string()
    } else {
        service.clone()
    };

    let settings = match SettingsRepository::new(state.db_pool.pool().clone()).get().await {
        Ok(settings) => settings,
        Err(e) => {
            error!("error loading settings for webhook: {}", e);
            log_webhook(
                &state,
                &webhook_type,
                None,
                &headers,
                &body,
                500,
                false,
                Some(e.to_string()),
            )
            .await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal_error"})),
            )
                .into_response();
        }
    };

    let result = dispatch(&state, &settings, &service, &headers, &body).await;

    let (status, body_json, processed, event_type, error_msg) = match result {
        Ok(dispatch) => {
            for bounce in dispatch.bounces {
                if let Err(e) = state.bounce_tx.send(bounce).await {
                    error!("error queuing bounce: {}", e);
                }
            }

            let body_json = dispatch
                .response_override
                .unwrap_or_else(|| json!({"success": true}));

            (StatusCode::OK, body_json, true, dispatch.event_type, None)
        }
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            warn!("webhook {} rejected: {}", webhook_type, err);
            (
                status,
                json!({"error": err.code().to_ascii_lowercase(), "message": err.to_string()}),
                false,
                None,
                Some(err.to_string()),
            )
        }
    };

    log_webhook(
        &state,
        &webhook_type,
        event_type.as_deref(),
        &headers,
        &body,
        status.as_u16() as i32,
        processed,
        error_msg,
    )
    .await;

    (status, Json(body_json)).into_response()
}

async fn dispatch(
    state: &Arc<AppState>,
    settings: &Settings,
    service: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Dispatch, Error> {
    match service {
        // Native internal webhook.
        "" => {
            let bounce = parse_native_bounce(body)?;
            Ok(Dispatch::bounces(vec![bounce]))
        }

        "ses" if settings.bounce_ses_enabled => {
            let handler = ses::Ses::new();
            match header_str(headers, "x-amz-sns-message-type") {
                "SubscriptionConfirmation" | "UnsubscribeConfirmation" => {
                    handler.process_subscription(body).await?;
                    Ok(Dispatch::bounces(Vec::new()))
                }
                "Notification" => {
                    let bounces = handler.process_bounce(body)?;
                    Ok(Dispatch::bounces(bounces))
                }
                other => Err(Error::Webhook(format!(
                    "unsupported SNS message type: {}",
                    other
                ))),
            }
        }

        "sendgrid" if settings.bounce_sendgrid_enabled => {
            let handler = sendgrid::Sendgrid::new(&settings.bounce_sendgrid_key)?;
            let signature = header_str(headers, "x-twilio-email-event-webhook-signature");
            let timestamp = header_str(headers, "x-twilio-email-event-webhook-timestamp");
            let bounces = handler.process(signature, timestamp, body)?;
            Ok(Dispatch::bounces(bounces))
        }

        "postmark" if settings.bounce_postmark_enabled => {
            let handler = postmark::Postmark::new(
                &settings.bounce_postmark_username,
                &settings.bounce_postmark_password,
            );
            handler.verify(header_str(headers, "authorization"))?;
            let bounces = handler.process(body)?;
            Ok(Dispatch::bounces(bounces))
        }

        "forwardemail" if settings.bounce_forwardemail_enabled => {
            let handler = forwardemail::Forwardemail::new(&settings.bounce_forwardemail_key);
            let signature = header_str(headers, "x-webhook-signature");
            let bounces = handler.process(signature, body)?;
            Ok(Dispatch::bounces(bounces))
        }

        "azure" if settings.bounce_azure_enabled => dispatch_azure(state, body).await,

        _ => Err(Error::Webhook(format!(
            "unknown or disabled bounce service: {}",
            service
        ))),
    }
}

/// Walk the Event Grid envelopes: answer the validation handshake when
/// present, otherwise correlate and record every report. Record-level
/// failures are logged but never change the response.
async fn dispatch_azure(state: &Arc<AppState>, body: &Bytes) -> Result<Dispatch, Error> {
    let events = azure::parse_events(body)?;

    let mut dispatch = Dispatch::bounces(Vec::new());
    dispatch.event_type = events.first().map(|e| e.event_type.clone());

    if events
        .iter()
        .any(|e| e.event_type == azure::EVENT_TYPE_VALIDATION)
    {
        let response = azure::validation_response(&events)?;
        dispatch.response_override = Some(serde_json::to_value(&response).unwrap_or_default());
        return Ok(dispatch);
    }

    for event in &events {
        match event.event_type.as_str() {
            azure::EVENT_TYPE_DELIVERY => {
                let data = match azure::parse_delivery(&event.data) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("error parsing Azure delivery event: {}", e);
                        continue;
                    }
                };

                match state.correlator.handle_delivery(&data, &event.data).await {
                    Ok(Some(bounce)) => dispatch.bounces.push(bounce),
                    Ok(None) => {}
                    Err(e) => error!("error processing Azure delivery event: {}", e),
                }
            }

            azure::EVENT_TYPE_ENGAGEMENT => {
                let data = match azure::parse_engagement(&event.data) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("error parsing Azure engagement event: {}", e);
                        continue;
                    }
                };

                if let Err(e) = state.correlator.handle_engagement(&data).await {
                    error!("error processing Azure engagement event: {}", e);
                }
            }

            other => debug!("ignoring Azure event type: {}", other),
        }
    }

    Ok(dispatch)
}

/// Parse and validate a native bounce submission
fn parse_native_bounce(body: &[u8]) -> Result<Bounce, Error> {
    let mut bounce: Bounce = serde_json::from_slice(body)
        .map_err(|e| Error::Validation(format!("invalid bounce payload: {}", e)))?;

    if bounce.email.is_empty() && bounce.subscriber_uuid.is_empty() {
        return Err(Error::Validation(
            "one of email or subscriber_uuid is required".to_string(),
        ));
    }

    if !bounce.subscriber_uuid.is_empty() && Uuid::parse_str(&bounce.subscriber_uuid).is_err() {
        return Err(Error::Validation("invalid subscriber_uuid".to_string()));
    }

    if !bounce.email.is_empty() {
        bounce.email = sanitize_email(&bounce.email)?;
    }

    if bounce.source.is_empty() {
        bounce.source = "native".to_string();
    }

    Ok(bounce)
}

/// Normalize an email address for native submissions
fn sanitize_email(raw: &str) -> Result<String, Error> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| Error::Validation(format!("invalid email: {}", raw)))?;

    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(Error::Validation(format!("invalid email: {}", raw)));
    }

    Ok(email)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Shopify purchase webhook: verify, parse and log. Attribution itself is
/// handled by the add-on; a verified order is acknowledged so Shopify does
/// not retry.
///
/// POST /api/webhooks/shopify
pub async fn shopify_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let settings = match SettingsRepository::new(state.db_pool.pool().clone()).get().await {
        Ok(settings) => settings,
        Err(e) => {
            error!("error loading settings for shopify webhook: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal_error"})),
            )
                .into_response();
        }
    };

    let handler = shopify::Shopify::new(&settings.shopify_webhook_secret);
    let hmac_header = header_str(&headers, "x-shopify-hmac-sha256");

    let result = handler
        .verify(hmac_header, &body)
        .and_then(|()| handler.parse_order(&body));

    let (status, body_json, processed, error_msg) = match result {
        Ok(order) => {
            debug!(
                "verified shopify order {} ({} {})",
                order.id, order.total_price, order.currency
            );
            (StatusCode::OK, json!({"success": true}), true, None)
        }
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            warn!("shopify webhook rejected: {}", err);
            (
                status,
                json!({"error": err.code().to_ascii_lowercase(), "message": err.to_string()}),
                false,
                Some(err.to_string()),
            )
        }
    };

    log_webhook(
        &state,
        "shopify",
        Some("order"),
        &headers,
        &body,
        status.as_u16() as i32,
        processed,
        error_msg,
    )
    .await;

    (status, Json(body_json)).into_response()
}

#[allow(clippy::too_many_arguments)]
async fn log_webhook(
    state: &Arc<AppState>,
    webhook_type: &str,
    event_type: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
    response_status: i32,
    processed: bool,
    error: Option<String>,
) {
    let mut header_map = serde_json::Map::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            header_map.insert(name.to_string(), json!(v));
        }
    }

    let log = NewWebhookLog {
        webhook_type: webhook_type.to_string(),
        event_type: event_type.map(|s| s.to_string()),
        headers: serde_json::Value::Object(header_map),
        body: String::from_utf8_lossy(body).into_owned(),
        response_status,
        processed,
        error,
    };

    let repo = WebhookLogRepository::new(state.db_pool.pool().clone());
    if let Err(e) = repo.insert(&log).await {
        error!("error creating webhook log: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_email() {
        assert_eq!(sanitize_email(" User@Example.COM ").unwrap(), "user@example.com");
        assert!(sanitize_email("not-an-email").is_err());
        assert!(sanitize_email("@example.com").is_err());
        assert!(sanitize_email("user@").is_err());
        assert!(sanitize_email("user@nodot").is_err());
    }

    #[test]
    fn test_parse_native_bounce_requires_identity() {
        assert!(parse_native_bounce(br#"{"type": "hard"}"#).is_err());
        assert!(parse_native_bounce(br#"{"type": "hard", "subscriber_uuid": "zzz"}"#).is_err());

        let bounce = parse_native_bounce(
            br#"{"type": "soft", "email": "User@Example.com", "meta": {"x": 1}}"#,
        )
        .unwrap();
        assert_eq!(bounce.email, "user@example.com");
        assert_eq!(bounce.source, "native");
    }
}
