//! Auto-pause worker
//!
//! Runs on its own one-minute timer, independent of the processor tick.
//! Outside the send window it pauses running queue campaigns; back inside
//! it requeues their cancelled items and flips them to running again. The
//! two workers coordinate only through campaign status rows.

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use postroom_storage::repository::{CampaignRepository, SettingsRepository};
use postroom_storage::DatabasePool;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use super::Config;

/// Auto-pause worker
pub struct AutoPauseWorker {
    campaigns: CampaignRepository,
    settings: SettingsRepository,
    cfg: Config,
    shutdown: watch::Receiver<bool>,
}

impl AutoPauseWorker {
    /// Create a new auto-pause worker
    pub fn new(db_pool: DatabasePool, cfg: Config, shutdown: watch::Receiver<bool>) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            settings: SettingsRepository::new(pool),
            cfg,
            shutdown,
        }
    }

    /// Run until shutdown, evaluating the window once a minute
    pub async fn run(self) {
        let window = self.cfg.send_window();
        if window.is_unbounded() {
            info!("no send window configured, auto-pause worker idle");
            return;
        }

        info!("auto-pause worker started for send window enforcement");

        let mut ticker = interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.pause_or_resume().await {
                        error!("error in auto-pause/resume: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("stopping auto-pause worker");
                    return;
                }
            }
        }
    }

    async fn pause_or_resume(&self) -> Result<()> {
        let settings = self.settings.get().await?;
        let window = self.cfg.send_window();

        let tz: Tz = settings.timezone.parse().unwrap_or(chrono_tz::UTC);
        let now = Utc::now().with_timezone(&tz);

        if window.contains(&now) {
            self.resume_campaigns().await
        } else {
            self.pause_campaigns().await
        }
    }

    async fn pause_campaigns(&self) -> Result<()> {
        let paused = self.campaigns.auto_pause_running().await?;
        if paused > 0 {
            info!(
                "auto-paused {} running campaign(s), outside send window",
                paused
            );
        }
        Ok(())
    }

    async fn resume_campaigns(&self) -> Result<()> {
        let paused = self.campaigns.paused_queue_campaigns().await?;
        if paused.is_empty() {
            return Ok(());
        }

        for campaign_id in &paused {
            match self.campaigns.requeue_cancelled(*campaign_id).await {
                Ok(0) => {}
                Ok(n) => info!("requeued {} cancelled emails for campaign {}", n, campaign_id),
                Err(e) => {
                    error!(
                        "error requeuing cancelled emails for campaign {}: {}",
                        campaign_id, e
                    );
                }
            }
        }

        let resumed = self.campaigns.resume_paused().await?;
        if resumed > 0 {
            info!(
                "auto-resumed {} paused campaign(s), entered send window",
                resumed
            );
        }

        Ok(())
    }
}
