//! Delivery/engagement event listing handlers

use axum::extract::{Path, Query, State};
use axum::Json;
use postroom_common::types::{CampaignId, SubscriberId};
use postroom_storage::models::{DeliveryEvent, EngagementEvent};
use postroom_storage::repository::{EventOrder, EventRepository, SortDirection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::handlers::{bad_request, default_limit, internal_error, ApiError, ListQuery, PageResponse};
use crate::state::AppState;

/// Query parameters for event listings
#[derive(Debug, Deserialize)]
pub struct EventListQuery {
    /// Delivery status or engagement type filter
    #[serde(default)]
    pub status: String,

    #[serde(rename = "type", default)]
    pub engagement_type: String,

    #[serde(default)]
    pub order_by: String,

    #[serde(default)]
    pub order: String,

    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default)]
    pub offset: i64,
}

impl EventListQuery {
    /// Validate ordering against the whitelist; free-form input never
    /// reaches the SQL text.
    fn ordering(&self) -> Result<(EventOrder, SortDirection), ApiError> {
        let order_by = if self.order_by.is_empty() {
            EventOrder::default()
        } else {
            self.order_by
                .parse()
                .map_err(|_| bad_request("order_by must be one of event_timestamp, created_at, status"))?
        };

        let direction = if self.order.is_empty() {
            SortDirection::default()
        } else {
            self.order
                .parse()
                .map_err(|_| bad_request("order must be ASC or DESC"))?
        };

        Ok((order_by, direction))
    }
}

/// Delivery events for a campaign
///
/// GET /api/campaigns/:id/delivery-events
pub async fn campaign_delivery_events(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<CampaignId>,
    Query(query): Query<EventListQuery>,
) -> Result<Json<PageResponse<DeliveryEvent>>, ApiError> {
    let (order_by, direction) = query.ordering()?;
    let status = (!query.status.is_empty()).then_some(query.status.as_str());

    let repo = EventRepository::new(state.db_pool.pool().clone());
    let (events, total) = repo
        .list_delivery_events(
            campaign_id,
            status,
            order_by,
            direction,
            query.offset,
            query.limit,
        )
        .await
        .map_err(|e| internal_error("Failed to list delivery events", e))?;

    Ok(Json(PageResponse {
        data: events,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Engagement events for a campaign
///
/// GET /api/campaigns/:id/engagement-events
pub async fn campaign_engagement_events(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<CampaignId>,
    Query(query): Query<EventListQuery>,
) -> Result<Json<PageResponse<EngagementEvent>>, ApiError> {
    let (order_by, direction) = query.ordering()?;
    let engagement_type =
        (!query.engagement_type.is_empty()).then_some(query.engagement_type.as_str());

    let repo = EventRepository::new(state.db_pool.pool().clone());
    let (events, total) = repo
        .list_engagement_events(
            campaign_id,
            engagement_type,
            order_by,
            direction,
            query.offset,
            query.limit,
        )
        .await
        .map_err(|e| internal_error("Failed to list engagement events", e))?;

    Ok(Json(PageResponse {
        data: events,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Delivery events for a subscriber
///
/// GET /api/subscribers/:id/delivery-events
pub async fn subscriber_delivery_events(
    State(state): State<Arc<AppState>>,
    Path(subscriber_id): Path<SubscriberId>,
    Query(page): Query<ListQuery>,
) -> Result<Json<Vec<DeliveryEvent>>, ApiError> {
    let repo = EventRepository::new(state.db_pool.pool().clone());
    let events = repo
        .subscriber_delivery_events(subscriber_id, page.offset, page.limit)
        .await
        .map_err(|e| internal_error("Failed to list delivery events", e))?;

    Ok(Json(events))
}

/// Engagement events for a subscriber
///
/// GET /api/subscribers/:id/engagement-events
pub async fn subscriber_engagement_events(
    State(state): State<Arc<AppState>>,
    Path(subscriber_id): Path<SubscriberId>,
    Query(page): Query<ListQuery>,
) -> Result<Json<Vec<EngagementEvent>>, ApiError> {
    let repo = EventRepository::new(state.db_pool.pool().clone());
    let events = repo
        .subscriber_engagement_events(subscriber_id, page.offset, page.limit)
        .await
        .map_err(|e| internal_error("Failed to list engagement events", e))?;

    Ok(Json(events))
}

#[derive(Debug, Serialize)]
pub struct StatEntry {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    pub delivery_stats: Vec<StatEntry>,
    pub engagement_stats: Vec<StatEntry>,
}

/// Aggregated delivery/engagement counts for a campaign
///
/// GET /api/campaigns/:id/events/analytics
pub async fn campaign_analytics(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let repo = EventRepository::new(state.db_pool.pool().clone());

    let delivery = repo
        .delivery_stats(campaign_id)
        .await
        .map_err(|e| internal_error("Failed to fetch delivery stats", e))?;

    let engagement = repo
        .engagement_stats(campaign_id)
        .await
        .map_err(|e| internal_error("Failed to fetch engagement stats", e))?;

    Ok(Json(AnalyticsResponse {
        delivery_stats: delivery
            .into_iter()
            .map(|c| StatEntry {
                key: c.key,
                count: c.count,
            })
            .collect(),
        engagement_stats: engagement
            .into_iter()
            .map(|c| StatEntry {
                key: c.key,
                count: c.count,
            })
            .collect(),
    }))
}
