//! Webhook log repository

use sqlx::PgPool;

use crate::models::{NewWebhookLog, WebhookLog};

/// Webhook log repository
#[derive(Clone)]
pub struct WebhookLogRepository {
    pool: PgPool,
}

impl WebhookLogRepository {
    /// Create a new webhook log repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist one inbound request trace
    pub async fn insert(&self, log: &NewWebhookLog) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO webhook_logs
                (webhook_type, event_type, headers, body, response_status, processed, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(&log.webhook_type)
        .bind(&log.event_type)
        .bind(&log.headers)
        .bind(&log.body)
        .bind(log.response_status)
        .bind(log.processed)
        .bind(&log.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Paginated listing, optionally filtered by webhook and event type
    pub async fn list(
        &self,
        webhook_type: Option<&str>,
        event_type: Option<&str>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<WebhookLog>, i64), sqlx::Error> {
        let logs = sqlx::query_as::<_, WebhookLog>(
            r#"
            SELECT id, webhook_type, event_type, headers, body, response_status,
                   processed, error, created_at
            FROM webhook_logs
            WHERE ($1::text IS NULL OR webhook_type = $1)
              AND ($2::text IS NULL OR event_type = $2)
            ORDER BY created_at DESC
            OFFSET $3 LIMIT $4
            "#,
        )
        .bind(webhook_type)
        .bind(event_type)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM webhook_logs
            WHERE ($1::text IS NULL OR webhook_type = $1)
              AND ($2::text IS NULL OR event_type = $2)
            "#,
        )
        .bind(webhook_type)
        .bind(event_type)
        .fetch_one(&self.pool)
        .await?;

        Ok((logs, total))
    }

    /// Everything, for the export endpoint
    pub async fn list_all(&self) -> Result<Vec<WebhookLog>, sqlx::Error> {
        sqlx::query_as::<_, WebhookLog>(
            r#"
            SELECT id, webhook_type, event_type, headers, body, response_status,
                   processed, error, created_at
            FROM webhook_logs
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Delete specific log entries
    pub async fn delete_ids(&self, ids: &[i64]) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM webhook_logs WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Purge all log entries
    pub async fn delete_all(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM webhook_logs")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
