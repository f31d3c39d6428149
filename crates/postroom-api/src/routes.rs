//! API routes

use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{events, health, queue, webhook_logs, webhooks};
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Health check routes
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/ready", get(health::readiness));

    // Queue administration
    let queue_routes = Router::new()
        .route("/", get(queue::list_queue))
        .route("/stats", get(queue::queue_stats))
        .route("/:id/cancel", post(queue::cancel_item))
        .route("/:id/retry", post(queue::retry_item))
        .route("/clear", post(queue::clear_queue))
        .route("/pause", post(queue::toggle_pause))
        .route("/send-now", post(queue::send_now));

    // Campaign-scoped queue and event routes
    let campaign_routes = Router::new()
        .route("/:id/queue", post(queue::queue_campaign))
        .route("/:id/estimate", get(queue::campaign_estimate))
        .route("/:id/delivery-events", get(events::campaign_delivery_events))
        .route(
            "/:id/engagement-events",
            get(events::campaign_engagement_events),
        )
        .route("/:id/events/analytics", get(events::campaign_analytics));

    // Subscriber-scoped event routes
    let subscriber_routes = Router::new()
        .route("/:id/delivery-events", get(events::subscriber_delivery_events))
        .route(
            "/:id/engagement-events",
            get(events::subscriber_engagement_events),
        );

    // Inbound webhooks
    let webhook_routes = Router::new()
        .route("/bounce", post(webhooks::bounce_webhook_native))
        .route("/bounce/:service", post(webhooks::bounce_webhook_service))
        .route("/shopify", post(webhooks::shopify_webhook));

    // Webhook traces
    let log_routes = Router::new()
        .route("/", get(webhook_logs::list_logs))
        .route("/", delete(webhook_logs::delete_logs))
        .route("/export", get(webhook_logs::export_logs));

    let api = Router::new()
        .nest("/queue", queue_routes)
        .nest("/campaigns", campaign_routes)
        .nest("/subscribers", subscriber_routes)
        .nest("/webhooks", webhook_routes)
        .nest("/webhook-logs", log_routes)
        .route("/smtp/capacity", get(queue::smtp_capacity));

    Router::new()
        .nest("/health", health_routes)
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
