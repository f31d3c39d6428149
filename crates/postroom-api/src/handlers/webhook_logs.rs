//! Webhook log handlers

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use postroom_storage::models::WebhookLog;
use postroom_storage::repository::WebhookLogRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::handlers::{bad_request, default_limit, internal_error, ApiError, PageResponse};
use crate::state::AppState;

/// Query parameters for the log listing
#[derive(Debug, Deserialize)]
pub struct LogListQuery {
    #[serde(default)]
    pub webhook_type: String,

    #[serde(default)]
    pub event_type: String,

    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default)]
    pub offset: i64,
}

/// List webhook traces
///
/// GET /api/webhook-logs
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogListQuery>,
) -> Result<Json<PageResponse<WebhookLog>>, ApiError> {
    let repo = WebhookLogRepository::new(state.db_pool.pool().clone());

    let webhook_type = (!query.webhook_type.is_empty()).then_some(query.webhook_type.as_str());
    let event_type = (!query.event_type.is_empty()).then_some(query.event_type.as_str());

    let (logs, total) = repo
        .list(webhook_type, event_type, query.offset, query.limit)
        .await
        .map_err(|e| internal_error("Failed to list webhook logs", e))?;

    Ok(Json(PageResponse {
        data: logs,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Export every webhook trace as a JSON download
///
/// GET /api/webhook-logs/export
pub async fn export_logs(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let repo = WebhookLogRepository::new(state.db_pool.pool().clone());
    let logs = repo
        .list_all()
        .await
        .map_err(|e| internal_error("Failed to export webhook logs", e))?;

    Ok((
        [(
            header::CONTENT_DISPOSITION,
            "attachment; filename=webhook-logs.json",
        )],
        Json(logs),
    )
        .into_response())
}

/// Query parameters for log deletion
#[derive(Debug, Deserialize)]
pub struct DeleteLogsQuery {
    #[serde(default)]
    pub all: bool,

    /// Comma-separated ids when `all` is false
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub deleted: u64,
}

/// Purge webhook traces
///
/// DELETE /api/webhook-logs
pub async fn delete_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteLogsQuery>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let repo = WebhookLogRepository::new(state.db_pool.pool().clone());

    let deleted = if query.all {
        repo.delete_all()
            .await
            .map_err(|e| internal_error("Failed to delete webhook logs", e))?
    } else {
        let ids: Vec<i64> = query
            .id
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|_| bad_request("Invalid id list"))?;

        if ids.is_empty() {
            return Err(bad_request("No ids given"));
        }

        repo.delete_ids(&ids)
            .await
            .map_err(|e| internal_error("Failed to delete webhook logs", e))?
    };

    Ok(Json(DeleteResponse {
        success: true,
        deleted,
    }))
}
