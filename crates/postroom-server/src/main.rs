//! Postroom - campaign email delivery engine entry point

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use postroom_common::config::Config;
use postroom_core::{
    AutoPauseWorker, AzureCorrelator, BounceManager, Processor, QueueWorkerConfig, SmtpMessenger,
};
use postroom_storage::repository::{BounceRepository, SettingsRepository, UsageRepository};
use postroom_storage::DatabasePool;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    init_logging(&config);

    info!("starting Postroom...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;

    // The account-wide counter row must exist before the first send.
    UsageRepository::new(db_pool.pool().clone())
        .ensure_account_state()
        .await?;

    // Runtime settings feed the worker configuration once at startup;
    // per-tick knobs are re-read by the workers themselves.
    let settings = SettingsRepository::new(db_pool.pool().clone()).get().await?;
    let queue_cfg = QueueWorkerConfig::new(&config.queue, &settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Bounce pipeline: webhook handlers feed the channel, the manager
    // drains it into the recorder.
    let recorder = Arc::new(BounceRepository::new(db_pool.pool().clone()));
    let bounce_manager = BounceManager::new(recorder, Vec::new());
    let bounce_tx = bounce_manager.sender();
    let bounce_handle = tokio::spawn(bounce_manager.run());

    // Queue processor
    let messenger = Arc::new(SmtpMessenger::new(
        db_pool.clone(),
        hostname(),
    ));
    let processor = Processor::new(
        db_pool.clone(),
        queue_cfg.clone(),
        messenger,
        shutdown_rx.clone(),
    );
    let processor_handle = tokio::spawn(processor.run());

    // Auto-pause worker
    let autopause = AutoPauseWorker::new(db_pool.clone(), queue_cfg.clone(), shutdown_rx);
    let autopause_handle = tokio::spawn(autopause.run());

    // HTTP API
    let state = Arc::new(postroom_api::AppState {
        db_pool: db_pool.clone(),
        queue_cfg,
        correlator: AzureCorrelator::new(db_pool.clone()),
        bounce_tx,
    });

    let app = postroom_api::create_router(state);
    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    let api_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    info!("Postroom started");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // Workers exit between ticks once the watch flips.
    let _ = shutdown_tx.send(true);
    let _ = processor_handle.await;
    let _ = autopause_handle.await;

    api_handle.abort();
    bounce_handle.abort();

    info!("Postroom shutdown complete");

    Ok(())
}

/// Log timestamps follow the operator's timezone so entries line up with
/// the send window the queue runs against.
struct TzTimer {
    tz: Tz,
}

impl FormatTime for TzTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let now = Utc::now().with_timezone(&self.tz);
        write!(w, "{}", now.format("%Y/%m/%d %I:%M:%S %p"))
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},postroom=debug", config.logging.level)));

    let tz: Tz = config.logging.timezone.parse().unwrap_or(chrono_tz::UTC);

    tracing_subscriber::registry()
        .with(
            tracing_fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_timer(TzTimer { tz }),
        )
        .with(filter)
        .init();
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "postroom.local".to_string())
}
