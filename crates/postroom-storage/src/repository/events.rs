//! Delivery/engagement event repository

use chrono::{DateTime, Utc};
use postroom_common::types::{CampaignId, SubscriberId};
use serde::Serialize;
use sqlx::PgPool;
use std::str::FromStr;

use crate::models::{DeliveryEvent, EngagementEvent, NewDeliveryEvent, NewEngagementEvent};

/// Allowed ORDER BY columns for event listings. Free-form ordering input is
/// rejected; anything outside this set cannot reach the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventOrder {
    #[default]
    EventTimestamp,
    CreatedAt,
    Status,
}

impl EventOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            EventOrder::EventTimestamp => "event_timestamp",
            EventOrder::CreatedAt => "created_at",
            EventOrder::Status => "status",
        }
    }
}

impl FromStr for EventOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event_timestamp" => Ok(EventOrder::EventTimestamp),
            "created_at" => Ok(EventOrder::CreatedAt),
            "status" => Ok(EventOrder::Status),
            other => Err(format!("unknown order column: {}", other)),
        }
    }
}

/// Sort direction for event listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortDirection::Asc),
            "DESC" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction: {}", other)),
        }
    }
}

/// Per-status and per-type aggregate counts for a campaign
#[derive(Debug, Clone, Serialize)]
pub struct EventCount {
    pub key: String,
    pub count: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for EventCount {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            key: row.try_get(0)?,
            count: row.try_get(1)?,
        })
    }
}

/// Delivery/engagement event repository
#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    /// Create a new event repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a delivery report
    pub async fn insert_delivery_event(
        &self,
        event: &NewDeliveryEvent,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO delivery_events
                (provider_message_id, campaign_id, subscriber_id, status, status_reason,
                 details, event_timestamp, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(&event.provider_message_id)
        .bind(event.campaign_id)
        .bind(event.subscriber_id)
        .bind(&event.status)
        .bind(&event.status_reason)
        .bind(&event.details)
        .bind(event.event_timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record an engagement report
    pub async fn insert_engagement_event(
        &self,
        event: &NewEngagementEvent,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO engagement_events
                (provider_message_id, internet_message_id, campaign_id, subscriber_id,
                 engagement_type, engagement_context, user_agent, event_timestamp, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            "#,
        )
        .bind(&event.provider_message_id)
        .bind(&event.internet_message_id)
        .bind(event.campaign_id)
        .bind(event.subscriber_id)
        .bind(&event.engagement_type)
        .bind(&event.engagement_context)
        .bind(&event.user_agent)
        .bind(event.event_timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count a view into the native tracker unless the same (campaign,
    /// subscriber) already has one within five seconds. Guards against
    /// double-counting when native pixel tracking is also enabled.
    pub async fn record_view_deduped(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO campaign_views (campaign_id, subscriber_id, created_at)
            SELECT $1, $2, $3
            WHERE NOT EXISTS (
                SELECT 1 FROM campaign_views
                WHERE campaign_id = $1
                  AND subscriber_id = $2
                  AND ABS(EXTRACT(EPOCH FROM (created_at - $3))) <= 5
            )
            "#,
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count a click into the native tracker, upserting the link row by URL.
    /// The same ±5 second de-duplication applies per (campaign, subscriber,
    /// link).
    pub async fn record_click_deduped(
        &self,
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let (link_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO links (uuid, url, created_at)
            VALUES (gen_random_uuid(), $1, NOW())
            ON CONFLICT (url) DO UPDATE SET url = EXCLUDED.url
            RETURNING id
            "#,
        )
        .bind(url)
        .fetch_one(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO link_clicks (campaign_id, subscriber_id, link_id, created_at)
            SELECT $1, $2, $3, $4
            WHERE NOT EXISTS (
                SELECT 1 FROM link_clicks
                WHERE campaign_id = $1
                  AND subscriber_id = $2
                  AND link_id = $3
                  AND ABS(EXTRACT(EPOCH FROM (created_at - $4))) <= 5
            )
            "#,
        )
        .bind(campaign_id)
        .bind(subscriber_id)
        .bind(link_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delivery events for a campaign, optionally filtered by status
    pub async fn list_delivery_events(
        &self,
        campaign_id: CampaignId,
        status: Option<&str>,
        order: EventOrder,
        direction: SortDirection,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<DeliveryEvent>, i64), sqlx::Error> {
        let query = format!(
            r#"
            SELECT id, provider_message_id, campaign_id, subscriber_id, status,
                   status_reason, details, event_timestamp, created_at
            FROM delivery_events
            WHERE campaign_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY {} {}
            OFFSET $3 LIMIT $4
            "#,
            order.as_sql(),
            direction.as_sql()
        );

        let events = sqlx::query_as::<_, DeliveryEvent>(&query)
            .bind(campaign_id)
            .bind(status)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM delivery_events
            WHERE campaign_id = $1
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(campaign_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok((events, total))
    }

    /// Engagement events for a campaign, optionally filtered by type
    pub async fn list_engagement_events(
        &self,
        campaign_id: CampaignId,
        engagement_type: Option<&str>,
        order: EventOrder,
        direction: SortDirection,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<EngagementEvent>, i64), sqlx::Error> {
        let query = format!(
            r#"
            SELECT id, provider_message_id, internet_message_id, campaign_id, subscriber_id,
                   engagement_type, engagement_context, user_agent, event_timestamp, created_at
            FROM engagement_events
            WHERE campaign_id = $1
              AND ($2::text IS NULL OR engagement_type = $2)
            ORDER BY {} {}
            OFFSET $3 LIMIT $4
            "#,
            order.as_sql(),
            direction.as_sql()
        );

        let events = sqlx::query_as::<_, EngagementEvent>(&query)
            .bind(campaign_id)
            .bind(engagement_type)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM engagement_events
            WHERE campaign_id = $1
              AND ($2::text IS NULL OR engagement_type = $2)
            "#,
        )
        .bind(campaign_id)
        .bind(engagement_type)
        .fetch_one(&self.pool)
        .await?;

        Ok((events, total))
    }

    /// Delivery events for a subscriber, newest first
    pub async fn subscriber_delivery_events(
        &self,
        subscriber_id: SubscriberId,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<DeliveryEvent>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryEvent>(
            r#"
            SELECT id, provider_message_id, campaign_id, subscriber_id, status,
                   status_reason, details, event_timestamp, created_at
            FROM delivery_events
            WHERE subscriber_id = $1
            ORDER BY event_timestamp DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(subscriber_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Engagement events for a subscriber, newest first
    pub async fn subscriber_engagement_events(
        &self,
        subscriber_id: SubscriberId,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<EngagementEvent>, sqlx::Error> {
        sqlx::query_as::<_, EngagementEvent>(
            r#"
            SELECT id, provider_message_id, internet_message_id, campaign_id, subscriber_id,
                   engagement_type, engagement_context, user_agent, event_timestamp, created_at
            FROM engagement_events
            WHERE subscriber_id = $1
            ORDER BY event_timestamp DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(subscriber_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Per-status delivery counts for a campaign
    pub async fn delivery_stats(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<EventCount>, sqlx::Error> {
        sqlx::query_as::<_, EventCount>(
            r#"
            SELECT status, COUNT(*) AS count
            FROM delivery_events
            WHERE campaign_id = $1
            GROUP BY status
            ORDER BY count DESC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Per-type engagement counts for a campaign
    pub async fn engagement_stats(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<EventCount>, sqlx::Error> {
        sqlx::query_as::<_, EventCount>(
            r#"
            SELECT engagement_type, COUNT(*) AS count
            FROM engagement_events
            WHERE campaign_id = $1
            GROUP BY engagement_type
            ORDER BY count DESC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_whitelist() {
        assert_eq!(
            "event_timestamp".parse::<EventOrder>().unwrap(),
            EventOrder::EventTimestamp
        );
        assert_eq!(
            "created_at".parse::<EventOrder>().unwrap(),
            EventOrder::CreatedAt
        );
        assert_eq!("status".parse::<EventOrder>().unwrap(), EventOrder::Status);

        // Anything outside the whitelist is rejected, never spliced into SQL.
        assert!("created_at; DROP TABLE delivery_events".parse::<EventOrder>().is_err());
        assert!("subscriber_id".parse::<EventOrder>().is_err());
    }

    #[test]
    fn test_sort_direction() {
        assert_eq!("asc".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert_eq!("DESC".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert!("sideways".parse::<SortDirection>().is_err());
    }
}
