//! Usage counter repository
//!
//! Counters are DB rows with conditional upserts rather than in-process
//! locks so that a restart (or a second process) sees consistent state.
//! Limits are enforced by the pre-send check; the post-send increment only
//! informs the next decision.

use sqlx::PgPool;
use std::time::Duration;

use crate::models::AccountWindowState;

/// Usage counter repository
#[derive(Clone)]
pub struct UsageRepository {
    pool: PgPool,
}

impl UsageRepository {
    /// Create a new usage repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Emails sent by a server today (UTC date)
    pub async fn daily_usage(&self, smtp_server_uuid: &str) -> Result<i32, sqlx::Error> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT emails_sent FROM smtp_daily_usage
            WHERE smtp_server_uuid = $1 AND usage_date = CURRENT_DATE
            "#,
        )
        .bind(smtp_server_uuid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(n,)| n).unwrap_or(0))
    }

    /// Emails sent by a server within its current sliding window. A window
    /// older than `duration` counts as empty.
    pub async fn sliding_window_usage(
        &self,
        smtp_server_uuid: &str,
        duration: Duration,
    ) -> Result<i32, sqlx::Error> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT emails_in_window FROM smtp_rate_limit_state
            WHERE smtp_server_uuid = $1
              AND NOW() - window_start <= $2::interval
            "#,
        )
        .bind(smtp_server_uuid)
        .bind(interval_str(duration))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(n,)| n).unwrap_or(0))
    }

    /// Bump the per-server counters after a successful send: daily usage and,
    /// when a window is configured, the sliding window state. Both writes
    /// happen in one transaction.
    pub async fn increment_server_usage(
        &self,
        smtp_server_uuid: &str,
        window_duration: Option<Duration>,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO smtp_daily_usage
                (smtp_server_uuid, usage_date, emails_sent, created_at, updated_at)
            VALUES ($1, CURRENT_DATE, 1, NOW(), NOW())
            ON CONFLICT (smtp_server_uuid, usage_date)
            DO UPDATE SET emails_sent = smtp_daily_usage.emails_sent + 1, updated_at = NOW()
            "#,
        )
        .bind(smtp_server_uuid)
        .execute(&mut *tx)
        .await?;

        if let Some(duration) = window_duration {
            sqlx::query(
                r#"
                INSERT INTO smtp_rate_limit_state
                    (smtp_server_uuid, window_start, emails_in_window, created_at, updated_at)
                VALUES ($1, NOW(), 1, NOW(), NOW())
                ON CONFLICT (smtp_server_uuid)
                DO UPDATE SET
                    window_start = CASE
                        WHEN NOW() - smtp_rate_limit_state.window_start > $2::interval
                        THEN NOW()
                        ELSE smtp_rate_limit_state.window_start
                    END,
                    emails_in_window = CASE
                        WHEN NOW() - smtp_rate_limit_state.window_start > $2::interval
                        THEN 1
                        ELSE smtp_rate_limit_state.emails_in_window + 1
                    END,
                    updated_at = NOW()
                "#,
            )
            .bind(smtp_server_uuid)
            .bind(interval_str(duration))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    /// Make sure the single account-wide state row exists
    pub async fn ensure_account_state(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO account_rate_limit_state
                (minute_window_start, emails_in_minute, hour_window_start, emails_in_hour, updated_at)
            SELECT NOW(), 0, NOW(), 0, NOW()
            WHERE NOT EXISTS (SELECT 1 FROM account_rate_limit_state)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Read the account-wide window state
    pub async fn account_state(&self) -> Result<Option<AccountWindowState>, sqlx::Error> {
        sqlx::query_as::<_, AccountWindowState>(
            r#"
            SELECT minute_window_start, emails_in_minute, hour_window_start, emails_in_hour
            FROM account_rate_limit_state
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
    }

    /// Bump the account-wide counters, resetting any window that has elapsed
    pub async fn increment_account_usage(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE account_rate_limit_state
            SET
                minute_window_start = CASE
                    WHEN NOW() - minute_window_start > interval '1 minute'
                    THEN NOW()
                    ELSE minute_window_start
                END,
                emails_in_minute = CASE
                    WHEN NOW() - minute_window_start > interval '1 minute'
                    THEN 1
                    ELSE emails_in_minute + 1
                END,
                hour_window_start = CASE
                    WHEN NOW() - hour_window_start > interval '1 hour'
                    THEN NOW()
                    ELSE hour_window_start
                END,
                emails_in_hour = CASE
                    WHEN NOW() - hour_window_start > interval '1 hour'
                    THEN 1
                    ELSE emails_in_hour + 1
                END,
                updated_at = NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drop every usage row. Used by the queue clear operation.
    pub async fn purge_all(&self) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM smtp_daily_usage")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM smtp_rate_limit_state")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM account_rate_limit_state")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Renders a Duration as a Postgres interval literal, e.g. "1800 seconds"
fn interval_str(d: Duration) -> String {
    format!("{} seconds", d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_str() {
        assert_eq!(interval_str(Duration::from_secs(1800)), "1800 seconds");
        assert_eq!(interval_str(Duration::from_secs(60)), "60 seconds");
    }
}
