//! Azure event correlator
//!
//! Maps delivery and engagement reports back to (campaign, subscriber) and
//! records them. Delivery reports correlate by provider message id with a
//! recipient-email fallback; engagement reports carry a different provider
//! id, so they go through preserved header UUIDs, then the internet message
//! id, then the same recipient fallback.

use anyhow::Result;
use postroom_common::types::{CampaignId, SubscriberId};
use postroom_storage::models::{Bounce, NewDeliveryEvent, NewEngagementEvent};
use postroom_storage::repository::{
    CampaignRepository, EventRepository, MessageTrackingRepository,
};
use postroom_storage::DatabasePool;
use tracing::{debug, warn};
use uuid::Uuid;

use super::webhooks::azure::{
    bounce_from_delivery, disposition, parse_timestamp, DeliveryData, Disposition, EngagementData,
};

/// Azure event correlator
#[derive(Clone)]
pub struct AzureCorrelator {
    tracking: MessageTrackingRepository,
    events: EventRepository,
    campaigns: CampaignRepository,
}

impl AzureCorrelator {
    /// Create a new correlator
    pub fn new(db_pool: DatabasePool) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            tracking: MessageTrackingRepository::new(pool.clone()),
            events: EventRepository::new(pool.clone()),
            campaigns: CampaignRepository::new(pool),
        }
    }

    /// Handle one delivery report. Returns the bounce to emit when the
    /// status warrants one.
    pub async fn handle_delivery(
        &self,
        data: &DeliveryData,
        raw: &serde_json::Value,
    ) -> Result<Option<Bounce>> {
        let disposition = disposition(&data.status);
        if disposition == Disposition::Ignore {
            return Ok(None);
        }
        if disposition == Disposition::Unknown {
            warn!("unknown delivery status: {}", data.status);
            return Ok(None);
        }

        let correlated = self.correlate_delivery(data).await?;

        if let Some((campaign_id, subscriber_id)) = correlated {
            if !data.message_id.is_empty() {
                let status_reason = data
                    .delivery_status_details
                    .as_ref()
                    .and_then(|d| d.get("statusMessage"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());

                self.events
                    .insert_delivery_event(&NewDeliveryEvent {
                        provider_message_id: data.message_id.clone(),
                        campaign_id,
                        subscriber_id,
                        status: data.status.clone(),
                        status_reason,
                        details: data
                            .delivery_status_details
                            .clone()
                            .unwrap_or_else(|| serde_json::json!({})),
                        event_timestamp: parse_timestamp(&data.delivery_attempt_time_stamp),
                    })
                    .await?;

                // The internet message id is the stable key engagement
                // reports correlate through later.
                if !data.internet_message_id.is_empty() {
                    self.tracking
                        .set_internet_message_id(&data.message_id, &data.internet_message_id)
                        .await?;
                }
            }
        } else {
            warn!(
                "no tracking info for Azure message {} (recipient {})",
                data.message_id, data.recipient
            );
        }

        let bounce_type = match disposition {
            Disposition::Bounce(t) => t,
            _ => return Ok(None),
        };

        let mut bounce = bounce_from_delivery(data, bounce_type, raw);
        if let Some((campaign_id, subscriber_id)) = correlated {
            bounce.subscriber_id = Some(subscriber_id);
            bounce.campaign_uuid = self
                .campaigns
                .uuid_of(campaign_id)
                .await?
                .map(|u| u.to_string());
        }

        Ok(Some(bounce))
    }

    /// Handle one engagement report
    pub async fn handle_engagement(&self, data: &EngagementData) -> Result<()> {
        let correlated = self.correlate_engagement(data).await?;

        let (campaign_id, subscriber_id) = match correlated {
            Some(ids) => ids,
            None => {
                warn!(
                    "no tracking info for Azure engagement {} (recipient {})",
                    data.message_id, data.recipient
                );
                return Ok(());
            }
        };

        let event_timestamp = parse_timestamp(&data.user_action_time_stamp);

        self.events
            .insert_engagement_event(&NewEngagementEvent {
                provider_message_id: data.message_id.clone(),
                internet_message_id: (!data.internet_message_id.is_empty())
                    .then(|| data.internet_message_id.clone()),
                campaign_id,
                subscriber_id,
                engagement_type: data.engagement_type.clone(),
                engagement_context: (!data.engagement_context.is_empty())
                    .then(|| data.engagement_context.clone()),
                user_agent: (!data.user_agent.is_empty()).then(|| data.user_agent.clone()),
                event_timestamp,
            })
            .await?;

        match data.engagement_type.as_str() {
            "view" => {
                let counted = self
                    .events
                    .record_view_deduped(campaign_id, subscriber_id, event_timestamp)
                    .await?;
                if !counted {
                    debug!(
                        "duplicate view for campaign {} subscriber {} within window",
                        campaign_id, subscriber_id
                    );
                }
            }
            "click" => {
                if data.engagement_context.is_empty() {
                    warn!("no engagement context (URL) in Azure click event");
                    return Ok(());
                }

                let counted = self
                    .events
                    .record_click_deduped(
                        campaign_id,
                        subscriber_id,
                        &data.engagement_context,
                        event_timestamp,
                    )
                    .await?;
                if !counted {
                    debug!(
                        "duplicate click for campaign {} subscriber {} within window",
                        campaign_id, subscriber_id
                    );
                }
            }
            other => {
                warn!("unknown engagement type: {}", other);
            }
        }

        Ok(())
    }

    /// Delivery correlation: tracking table first, recipient email second
    async fn correlate_delivery(
        &self,
        data: &DeliveryData,
    ) -> Result<Option<(CampaignId, SubscriberId)>> {
        if !data.message_id.is_empty() {
            if let Some(tracking) = self.tracking.find_by_provider_id(&data.message_id).await? {
                return Ok(Some((tracking.campaign_id, tracking.subscriber_id)));
            }
        }

        if !data.recipient.is_empty() {
            debug!(
                "message id lookup failed for {}, trying recipient email",
                data.message_id
            );
            if let Some(ids) = self
                .campaigns
                .find_by_recipient_email(&data.recipient)
                .await?
            {
                return Ok(Some(ids));
            }
        }

        Ok(None)
    }

    /// Engagement correlation: header UUIDs, then internet message id, then
    /// recipient email
    async fn correlate_engagement(
        &self,
        data: &EngagementData,
    ) -> Result<Option<(CampaignId, SubscriberId)>> {
        if !data.campaign_uuid.is_empty() && !data.subscriber_uuid.is_empty() {
            if let (Ok(campaign_uuid), Ok(subscriber_uuid)) = (
                Uuid::parse_str(&data.campaign_uuid),
                Uuid::parse_str(&data.subscriber_uuid),
            ) {
                if let Some(ids) = self
                    .campaigns
                    .resolve_uuids(campaign_uuid, subscriber_uuid)
                    .await?
                {
                    return Ok(Some(ids));
                }
            }
        }

        if !data.internet_message_id.is_empty() {
            if let Some(tracking) = self
                .tracking
                .find_by_internet_message_id(&data.internet_message_id)
                .await?
            {
                return Ok(Some((tracking.campaign_id, tracking.subscriber_id)));
            }
        }

        if !data.recipient.is_empty() {
            debug!(
                "message id lookup failed for engagement {}, trying recipient email",
                data.message_id
            );
            if let Some(ids) = self
                .campaigns
                .find_by_recipient_email(&data.recipient)
                .await?
            {
                return Ok(Some(ids));
            }
        }

        Ok(None)
    }
}
