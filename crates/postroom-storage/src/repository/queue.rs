//! Email queue repository

use chrono::{DateTime, Utc};
use postroom_common::types::{CampaignId, QueueItemId, SubscriberId};
use sqlx::PgPool;

use crate::models::{ClearCounts, QueueItem, QueueItemDetail, QueueStats, ScheduleAssignment};

/// Filters for queue listings
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    /// 0 matches all campaigns
    pub campaign_id: CampaignId,
    /// Empty matches all statuses
    pub status: Vec<String>,
    /// Empty matches all servers
    pub smtp_server_uuid: String,
    /// Substring match on the subscriber email
    pub subscriber: String,
}

/// Email queue repository
#[derive(Clone)]
pub struct QueueRepository {
    pool: PgPool,
}

impl QueueRepository {
    /// Create a new queue repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bulk-insert queued rows for every list subscriber of a campaign that
    /// is not already present in the queue. Returns the number of rows added.
    pub async fn enqueue_campaign(&self, campaign_id: CampaignId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO email_queue
                (campaign_id, subscriber_id, status, priority, scheduled_at, created_at, updated_at)
            SELECT $1, s.id, 'queued', 0, NOW(), NOW(), NOW()
            FROM subscribers s
            JOIN subscriber_lists sl ON sl.subscriber_id = s.id
            JOIN campaign_lists cl ON cl.list_id = sl.list_id
            WHERE cl.campaign_id = $1
              AND s.status != 'blocklisted'
              AND NOT EXISTS (
                SELECT 1 FROM email_queue eq
                WHERE eq.campaign_id = $1 AND eq.subscriber_id = s.id
              )
            GROUP BY s.id
            "#,
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Queued item ids for a campaign in insertion order, for the scheduler
    pub async fn unscheduled_items(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<QueueItemId>, sqlx::Error> {
        let rows: Vec<(QueueItemId,)> = sqlx::query_as(
            r#"
            SELECT id FROM email_queue
            WHERE campaign_id = $1 AND status = 'queued'
            ORDER BY id ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Write a schedule plan in a single transaction. Either the whole
    /// campaign gets its (scheduled_at, server) pairs or nothing does.
    pub async fn apply_schedule(
        &self,
        assignments: &[ScheduleAssignment],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for a in assignments {
            sqlx::query(
                r#"
                UPDATE email_queue
                SET scheduled_at = $1,
                    assigned_smtp_server_uuid = $2,
                    updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(a.scheduled_at)
            .bind(&a.smtp_server_uuid)
            .bind(a.item_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    /// Fetch the next batch of due items. When `smart_sending_hours` is set,
    /// subscribers contacted within that many hours are excluded at the SQL
    /// level so they never consume rate budget.
    pub async fn next_batch(
        &self,
        limit: i64,
        smart_sending_hours: Option<i32>,
    ) -> Result<Vec<QueueItem>, sqlx::Error> {
        if let Some(hours) = smart_sending_hours {
            sqlx::query_as::<_, QueueItem>(
                r#"
                SELECT eq.id, eq.campaign_id, eq.subscriber_id, eq.status, eq.priority,
                       eq.scheduled_at, eq.sent_at, eq.assigned_smtp_server_uuid,
                       eq.retry_count, eq.last_error, eq.created_at, eq.updated_at
                FROM email_queue eq
                LEFT JOIN subscriber_last_send sls ON eq.subscriber_id = sls.subscriber_id
                WHERE eq.status = 'queued'
                  AND eq.scheduled_at <= NOW()
                  AND (
                    sls.last_campaign_send_at IS NULL
                    OR sls.last_campaign_send_at <= NOW() - INTERVAL '1 hour' * $1
                  )
                ORDER BY eq.priority DESC, eq.scheduled_at ASC
                LIMIT $2
                "#,
            )
            .bind(hours)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, QueueItem>(
                r#"
                SELECT id, campaign_id, subscriber_id, status, priority,
                       scheduled_at, sent_at, assigned_smtp_server_uuid,
                       retry_count, last_error, created_at, updated_at
                FROM email_queue
                WHERE status = 'queued'
                  AND scheduled_at <= NOW()
                ORDER BY priority DESC, scheduled_at ASC
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
    }

    /// Atomically claim an item for sending. Returns false when another
    /// worker got there first.
    pub async fn claim(
        &self,
        id: QueueItemId,
        smtp_server_uuid: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'sending', assigned_smtp_server_uuid = $1, updated_at = NOW()
            WHERE id = $2 AND status = 'queued'
            "#,
        )
        .bind(smtp_server_uuid)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark an item delivered
    pub async fn mark_sent(&self, id: QueueItemId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'sent', sent_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark an item failed, bumping the retry counter
    pub async fn mark_failed(&self, id: QueueItemId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'failed', last_error = $1, retry_count = retry_count + 1,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Put a claimed item back in the queue. Rate-limit reverts are not
    /// retries: retry_count and last_error stay untouched.
    pub async fn requeue(&self, id: QueueItemId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'queued', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Cancel a queued item. Returns false when the item is not in `queued`.
    pub async fn cancel(&self, id: QueueItemId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Requeue a failed or cancelled item, clearing its last error
    pub async fn retry(&self, id: QueueItemId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'queued', last_error = NULL, updated_at = NOW()
            WHERE id = $1 AND status IN ('failed', 'cancelled')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Truncate the queue, returning the prior per-status counts
    pub async fn clear(&self) -> Result<ClearCounts, sqlx::Error> {
        let counts: ClearCounts = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'queued' THEN 1 ELSE 0 END), 0) AS queued,
                COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0) AS cancelled,
                COALESCE(SUM(CASE WHEN status = 'sent' THEN 1 ELSE 0 END), 0) AS sent,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed
            FROM email_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        sqlx::query("TRUNCATE email_queue").execute(&self.pool).await?;

        Ok(counts)
    }

    /// Set scheduled_at = NOW() for every queued item
    pub async fn send_all_now(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET scheduled_at = NOW(), updated_at = NOW()
            WHERE status = 'queued'
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Queue summary statistics
    pub async fn stats(&self) -> Result<QueueStats, sqlx::Error> {
        let mut stats: QueueStats = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'queued' THEN 1 ELSE 0 END), 0) AS queued,
                COALESCE(SUM(CASE WHEN status = 'sending' THEN 1 ELSE 0 END), 0) AS sending,
                COALESCE(SUM(CASE WHEN status = 'sent' THEN 1 ELSE 0 END), 0) AS sent,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0) AS cancelled
            FROM email_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let next: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
            r#"
            SELECT MIN(scheduled_at) FROM email_queue WHERE status = 'queued'
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        stats.next_scheduled_at = next.and_then(|(t,)| t);
        Ok(stats)
    }

    /// Paginated listing joined with campaign and subscriber details
    pub async fn list(
        &self,
        filter: &QueueFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<QueueItemDetail>, sqlx::Error> {
        sqlx::query_as::<_, QueueItemDetail>(
            r#"
            SELECT eq.id, eq.campaign_id, c.name AS campaign_name, c.uuid AS campaign_uuid,
                   eq.subscriber_id, s.email AS subscriber_email, s.uuid AS subscriber_uuid,
                   eq.status, eq.priority, eq.scheduled_at, eq.sent_at,
                   eq.assigned_smtp_server_uuid, eq.retry_count, eq.last_error,
                   eq.created_at, eq.updated_at,
                   COUNT(*) OVER () AS total
            FROM email_queue eq
            JOIN campaigns c ON c.id = eq.campaign_id
            JOIN subscribers s ON s.id = eq.subscriber_id
            WHERE ($1 = 0 OR eq.campaign_id = $1)
              AND (cardinality($2::text[]) = 0 OR eq.status = ANY($2))
              AND ($3 = '' OR eq.assigned_smtp_server_uuid = $3)
              AND ($4 = '' OR s.email ILIKE '%' || $4 || '%')
            ORDER BY eq.priority DESC, eq.scheduled_at ASC, eq.id ASC
            OFFSET $5 LIMIT $6
            "#,
        )
        .bind(filter.campaign_id)
        .bind(&filter.status)
        .bind(&filter.smtp_server_uuid)
        .bind(&filter.subscriber)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Number of queued items for a campaign
    pub async fn queued_count(&self, campaign_id: CampaignId) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM email_queue WHERE campaign_id = $1 AND status = 'queued'",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Record a successful campaign send for smart sending
    pub async fn touch_subscriber_last_send(
        &self,
        subscriber_id: SubscriberId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO subscriber_last_send (subscriber_id, last_campaign_send_at, updated_at)
            VALUES ($1, NOW(), NOW())
            ON CONFLICT (subscriber_id)
            DO UPDATE SET last_campaign_send_at = NOW(), updated_at = NOW()
            "#,
        )
        .bind(subscriber_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
