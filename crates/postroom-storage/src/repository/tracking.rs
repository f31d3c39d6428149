//! Provider message tracking repository
//!
//! One row per sent message keyed by the provider's message id. The
//! internet_message_id (the RFC 5322 Message-ID) is backfilled from delivery
//! reports because engagement reports carry a different provider id.

use postroom_common::types::{CampaignId, SubscriberId};
use sqlx::PgPool;

use crate::models::MessageTracking;

/// Message tracking repository
#[derive(Clone)]
pub struct MessageTrackingRepository {
    pool: PgPool,
}

impl MessageTrackingRepository {
    /// Create a new tracking repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record the provider message id for a send
    pub async fn insert(
        &self,
        provider_message_id: &str,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO provider_message_tracking
                (provider_message_id, campaign_id, subscriber_id, sent_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (provider_message_id) DO NOTHING
            "#,
        )
        .bind(provider_message_id)
        .bind(campaign_id)
        .bind(subscriber_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up by the provider message id
    pub async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<MessageTracking>, sqlx::Error> {
        sqlx::query_as::<_, MessageTracking>(
            r#"
            SELECT id, provider_message_id, internet_message_id, campaign_id, subscriber_id, sent_at
            FROM provider_message_tracking
            WHERE provider_message_id = $1
            "#,
        )
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Look up by the internet message id (Message-ID header)
    pub async fn find_by_internet_message_id(
        &self,
        internet_message_id: &str,
    ) -> Result<Option<MessageTracking>, sqlx::Error> {
        sqlx::query_as::<_, MessageTracking>(
            r#"
            SELECT id, provider_message_id, internet_message_id, campaign_id, subscriber_id, sent_at
            FROM provider_message_tracking
            WHERE internet_message_id = $1
            "#,
        )
        .bind(internet_message_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Backfill the internet message id once a delivery report reveals it
    pub async fn set_internet_message_id(
        &self,
        provider_message_id: &str,
        internet_message_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE provider_message_tracking
            SET internet_message_id = $1
            WHERE provider_message_id = $2
            "#,
        )
        .bind(internet_message_id)
        .bind(provider_message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
