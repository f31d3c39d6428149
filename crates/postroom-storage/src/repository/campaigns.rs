//! Campaign repository
//!
//! The queue core only owns a campaign's status and auto-pause markers;
//! authoring lives elsewhere.

use postroom_common::types::{CampaignId, SubscriberId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Campaign, CampaignStatus};

/// Campaign repository
#[derive(Clone)]
pub struct CampaignRepository {
    pool: PgPool,
}

impl CampaignRepository {
    /// Create a new campaign repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a campaign by id
    pub async fn get(&self, id: CampaignId) -> Result<Option<Campaign>, sqlx::Error> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, uuid, name, status, use_queue, auto_paused, auto_paused_at,
                   queue_completed_at, created_at, updated_at
            FROM campaigns
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Get just a campaign's UUID
    pub async fn uuid_of(&self, id: CampaignId) -> Result<Option<Uuid>, sqlx::Error> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT uuid FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(u,)| u))
    }

    /// Update a campaign's status
    pub async fn update_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET status = $1, updated_at = NOW() WHERE id = $2
            "#,
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Pause every running queue campaign that is not already auto-paused.
    /// Returns the number of campaigns paused.
    pub async fn auto_pause_running(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'paused',
                auto_paused = TRUE,
                auto_paused_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running'
              AND use_queue = TRUE
              AND auto_paused = FALSE
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Ids of all paused queue campaigns
    pub async fn paused_queue_campaigns(&self) -> Result<Vec<CampaignId>, sqlx::Error> {
        let rows: Vec<(CampaignId,)> = sqlx::query_as(
            r#"
            SELECT id FROM campaigns WHERE status = 'paused' AND use_queue = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Flip cancelled queue items of a campaign back to queued, skipping
    /// subscribers the campaign already reached. Returns rows changed.
    pub async fn requeue_cancelled(&self, campaign_id: CampaignId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'queued', updated_at = NOW()
            WHERE campaign_id = $1
              AND status = 'cancelled'
              AND subscriber_id NOT IN (
                SELECT subscriber_id FROM email_queue
                WHERE campaign_id = $1 AND status = 'sent'
              )
            "#,
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Set every paused queue campaign back to running, clearing the
    /// auto-pause markers. Returns the number of campaigns resumed.
    pub async fn resume_paused(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'running',
                auto_paused = FALSE,
                auto_paused_at = NULL,
                updated_at = NOW()
            WHERE status = 'paused'
              AND use_queue = TRUE
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Running queue campaigns whose queue items are all in a terminal state
    pub async fn completed_queue_campaigns(
        &self,
    ) -> Result<Vec<(CampaignId, String)>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT DISTINCT c.id, c.name
            FROM campaigns c
            WHERE c.status = 'running'
              AND c.use_queue = TRUE
              AND NOT EXISTS (
                SELECT 1 FROM email_queue eq
                WHERE eq.campaign_id = c.id
                  AND eq.status IN ('queued', 'sending')
              )
              AND EXISTS (
                SELECT 1 FROM email_queue eq WHERE eq.campaign_id = c.id
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Mark a queue campaign finished
    pub async fn mark_finished(&self, id: CampaignId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'finished', queue_completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Correlation fallback: the most recently updated campaign in a
    /// post-start status, joined with the subscriber by email.
    pub async fn find_by_recipient_email(
        &self,
        email: &str,
    ) -> Result<Option<(CampaignId, SubscriberId)>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT c.id, s.id
            FROM campaigns c
            CROSS JOIN subscribers s
            WHERE s.email = $1
              AND c.status IN ('running', 'finished', 'paused', 'cancelled')
            ORDER BY c.updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resolve (campaign, subscriber) row ids from their UUIDs
    pub async fn resolve_uuids(
        &self,
        campaign_uuid: Uuid,
        subscriber_uuid: Uuid,
    ) -> Result<Option<(CampaignId, SubscriberId)>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT c.id, s.id
            FROM campaigns c, subscribers s
            WHERE c.uuid = $1 AND s.uuid = $2
            "#,
        )
        .bind(campaign_uuid)
        .bind(subscriber_uuid)
        .fetch_optional(&self.pool)
        .await
    }

    /// Campaign subject/body and the subscriber address for one queued send
    pub async fn message_parts(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
    ) -> Result<Option<(String, String, String)>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT c.subject, c.body, s.email
            FROM campaigns c, subscribers s
            WHERE c.id = $1 AND s.id = $2
            "#,
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .fetch_optional(&self.pool)
        .await
    }
}
