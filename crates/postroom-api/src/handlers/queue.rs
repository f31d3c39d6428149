//! Queue administration handlers

use axum::extract::{Path, Query, State};
use axum::Json;
use postroom_common::types::{CampaignId, QueueItemId};
use postroom_core::{Estimator, Scheduler};
use postroom_core::queue::ServerCapacity;
use postroom_core::DeliveryEstimate;
use postroom_storage::models::{ClearCounts, QueueItemDetail, QueueStats, QueueStatus};
use postroom_storage::repository::{
    QueueFilter, QueueRepository, SettingsRepository, UsageRepository,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::handlers::{
    bad_request, default_limit, from_core, internal_error, not_found, ApiError, PageResponse,
};
use crate::state::AppState;

/// Query parameters for the queue listing
#[derive(Debug, Deserialize)]
pub struct QueueListQuery {
    #[serde(default)]
    pub campaign_id: CampaignId,

    /// Comma-separated list of statuses
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub smtp_server_uuid: String,

    /// Substring match on the subscriber email
    #[serde(default)]
    pub subscriber: String,

    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default)]
    pub offset: i64,
}

/// List queue items with filters
///
/// GET /api/queue
pub async fn list_queue(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QueueListQuery>,
) -> Result<Json<PageResponse<QueueItemDetail>>, ApiError> {
    let statuses: Vec<String> = query
        .status
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<QueueStatus>()
                .map(|status| status.to_string())
                .map_err(|_| bad_request("Invalid status filter"))
        })
        .collect::<Result<_, _>>()?;

    let filter = QueueFilter {
        campaign_id: query.campaign_id,
        status: statuses,
        smtp_server_uuid: query.smtp_server_uuid,
        subscriber: query.subscriber,
    };

    let repo = QueueRepository::new(state.db_pool.pool().clone());
    let items = repo
        .list(&filter, query.offset, query.limit)
        .await
        .map_err(|e| internal_error("Failed to list queue items", e))?;

    let total = items.first().map(|i| i.total).unwrap_or(0);

    Ok(Json(PageResponse {
        data: items,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Queue summary statistics
///
/// GET /api/queue/stats
pub async fn queue_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueStats>, ApiError> {
    let repo = QueueRepository::new(state.db_pool.pool().clone());
    let stats = repo
        .stats()
        .await
        .map_err(|e| internal_error("Failed to fetch queue statistics", e))?;

    Ok(Json(stats))
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

/// Cancel a queued item
///
/// POST /api/queue/:id/cancel
pub async fn cancel_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<QueueItemId>,
) -> Result<Json<OkResponse>, ApiError> {
    let repo = QueueRepository::new(state.db_pool.pool().clone());
    let cancelled = repo
        .cancel(id)
        .await
        .map_err(|e| internal_error("Failed to cancel queue item", e))?;

    if !cancelled {
        return Err(not_found("Queue item not found or already processed"));
    }

    Ok(Json(OkResponse { success: true }))
}

/// Requeue a failed or cancelled item
///
/// POST /api/queue/:id/retry
pub async fn retry_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<QueueItemId>,
) -> Result<Json<OkResponse>, ApiError> {
    let repo = QueueRepository::new(state.db_pool.pool().clone());
    let retried = repo
        .retry(id)
        .await
        .map_err(|e| internal_error("Failed to retry queue item", e))?;

    if !retried {
        return Err(not_found("Queue item not found or not in a retriable state"));
    }

    Ok(Json(OkResponse { success: true }))
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub success: bool,
    #[serde(flatten)]
    pub counts: ClearCounts,
    pub reset_counters: bool,
}

/// Truncate the queue and reset every usage counter
///
/// POST /api/queue/clear
pub async fn clear_queue(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClearResponse>, ApiError> {
    let queue = QueueRepository::new(state.db_pool.pool().clone());
    let usage = UsageRepository::new(state.db_pool.pool().clone());

    let counts = queue
        .clear()
        .await
        .map_err(|e| internal_error("Failed to clear queue", e))?;

    info!(
        "cleared queue: {} queued, {} cancelled, {} sent, {} failed",
        counts.queued, counts.cancelled, counts.sent, counts.failed
    );

    let reset_counters = match usage.purge_all().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("error resetting usage counters: {}", e);
            false
        }
    };

    Ok(Json(ClearResponse {
        success: true,
        counts,
        reset_counters,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PauseRequest {
    pub paused: bool,
}

#[derive(Debug, Serialize)]
pub struct PauseResponse {
    pub success: bool,
    pub paused: bool,
}

/// Flip the persisted queue pause switch
///
/// POST /api/queue/pause
pub async fn toggle_pause(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PauseRequest>,
) -> Result<Json<PauseResponse>, ApiError> {
    let settings = SettingsRepository::new(state.db_pool.pool().clone());
    settings
        .set_queue_paused(req.paused)
        .await
        .map_err(|e| internal_error("Failed to update queue pause setting", e))?;

    info!("queue {}", if req.paused { "paused" } else { "resumed" });

    Ok(Json(PauseResponse {
        success: true,
        paused: req.paused,
    }))
}

#[derive(Debug, Serialize)]
pub struct SendNowResponse {
    pub success: bool,
    pub count: u64,
}

/// Schedule every queued item for immediate sending
///
/// POST /api/queue/send-now
pub async fn send_now(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SendNowResponse>, ApiError> {
    let repo = QueueRepository::new(state.db_pool.pool().clone());
    let count = repo
        .send_all_now()
        .await
        .map_err(|e| internal_error("Failed to schedule queued emails", e))?;

    info!("scheduled {} queued emails for immediate sending", count);

    Ok(Json(SendNowResponse {
        success: true,
        count,
    }))
}

/// Per-server daily capacity
///
/// GET /api/smtp/capacity
pub async fn smtp_capacity(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ServerCapacity>>, ApiError> {
    let settings = SettingsRepository::new(state.db_pool.pool().clone())
        .get()
        .await
        .map_err(|e| internal_error("Failed to load settings", e))?;

    let estimator = Estimator::new(state.db_pool.clone(), state.queue_cfg.clone());
    let capacities = estimator
        .capacity_summary(&settings)
        .await
        .map_err(from_core)?;

    Ok(Json(capacities))
}

#[derive(Debug, Serialize)]
pub struct QueueCampaignResponse {
    pub success: bool,
    pub scheduled: usize,
}

/// Enqueue and schedule a campaign
///
/// POST /api/campaigns/:id/queue
pub async fn queue_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<QueueCampaignResponse>, ApiError> {
    if campaign_id < 1 {
        return Err(bad_request("Invalid campaign id"));
    }

    let settings = SettingsRepository::new(state.db_pool.pool().clone())
        .get()
        .await
        .map_err(|e| internal_error("Failed to load settings", e))?;

    let scheduler = Scheduler::new(state.db_pool.clone(), state.queue_cfg.clone());
    let scheduled = scheduler
        .start_campaign(campaign_id, &settings)
        .await
        .map_err(from_core)?;

    Ok(Json(QueueCampaignResponse {
        success: true,
        scheduled,
    }))
}

/// Delivery timeline estimate for a campaign's queued items
///
/// GET /api/campaigns/:id/estimate
pub async fn campaign_estimate(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<CampaignId>,
) -> Result<Json<DeliveryEstimate>, ApiError> {
    let queue = QueueRepository::new(state.db_pool.pool().clone());
    let total = queue
        .queued_count(campaign_id)
        .await
        .map_err(|e| internal_error("Failed to count queued emails", e))?;

    let settings = SettingsRepository::new(state.db_pool.pool().clone())
        .get()
        .await
        .map_err(|e| internal_error("Failed to load settings", e))?;

    let estimator = Estimator::new(state.db_pool.clone(), state.queue_cfg.clone());
    let estimate = estimator.estimate(total, &settings).map_err(from_core)?;

    Ok(Json(estimate))
}
