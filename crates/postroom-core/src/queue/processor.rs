//! Queue processor
//!
//! A single long-lived worker that drains due queue items in batches,
//! enforces the account-wide and per-server rate policies, pushes messages
//! through a bounded send pool and records the outcome of every attempt.

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use postroom_storage::models::{QueueItem, Settings};
use postroom_storage::repository::{
    CampaignRepository, MessageTrackingRepository, QueueRepository, SettingsRepository,
    UsageRepository,
};
use postroom_storage::DatabasePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::messenger::Messenger;

use super::{send_delay, Config, ServerCapacity};

/// Queue processor
pub struct Processor {
    queue: QueueRepository,
    usage: UsageRepository,
    campaigns: CampaignRepository,
    tracking: MessageTrackingRepository,
    settings: SettingsRepository,
    messenger: Arc<dyn Messenger>,
    cfg: Config,
    shutdown: watch::Receiver<bool>,
}

impl Processor {
    /// Create a new queue processor
    pub fn new(
        db_pool: DatabasePool,
        cfg: Config,
        messenger: Arc<dyn Messenger>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            queue: QueueRepository::new(pool.clone()),
            usage: UsageRepository::new(pool.clone()),
            campaigns: CampaignRepository::new(pool.clone()),
            tracking: MessageTrackingRepository::new(pool.clone()),
            settings: SettingsRepository::new(pool),
            messenger,
            cfg,
            shutdown,
        }
    }

    /// Run the poll loop until shutdown is signalled. Shutdown is
    /// cooperative: an in-flight tick always finishes its batch.
    pub async fn run(self) {
        info!(
            "queue processor started (batch: {}, interval: {:?})",
            self.cfg.batch_size, self.cfg.poll_interval
        );

        let mut ticker = interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("error processing queue: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("stopping queue processor");
                    return;
                }
            }
        }
    }

    /// Process one batch of due emails
    async fn tick(&self) -> Result<()> {
        let settings = self.settings.get().await?;

        if settings.queue_paused {
            return Ok(());
        }

        if !self.within_time_window(&settings) {
            return Ok(());
        }

        let smart_hours = settings
            .smart_sending_enabled
            .then_some(settings.smart_sending_period_hours);

        let batch = self.queue.next_batch(self.cfg.batch_size, smart_hours).await?;
        if batch.is_empty() {
            return Ok(());
        }

        debug!("processing {} due emails", batch.len());

        let mut capacities = self.server_capacities(&settings).await?;

        let max_concurrent = settings.concurrency.max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut handles = Vec::new();

        let mut pacer = send_delay(&settings).map(|delay| {
            info!(
                "rate limiter: one message every {:?} across the account",
                delay
            );
            let mut t = interval(delay);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });

        // Per-batch sliding window accounting so one batch cannot blow
        // through a server's window before the DB counters catch up.
        let mut batch_usage: HashMap<String, i32> = HashMap::new();

        for item in batch {
            let server_uuid = match select_server(&capacities, item.assigned_smtp_server_uuid.as_deref()) {
                Some(uuid) => uuid,
                None => {
                    warn!(
                        "no SMTP server available for email {} (campaign {}, subscriber {}), all servers at capacity",
                        item.id, item.campaign_id, item.subscriber_id
                    );
                    continue;
                }
            };

            if let Some(cap) = capacities.get(&server_uuid) {
                debug!(
                    "email {} (campaign {}, subscriber {}) -> server '{}' ({}/{} daily remaining)",
                    item.id, item.campaign_id, item.subscriber_id,
                    cap.name, cap.daily_remaining, cap.daily_limit
                );

                if cap.sliding_window_limit > 0
                    && batch_usage.get(&server_uuid).copied().unwrap_or(0)
                        >= cap.sliding_window_limit
                {
                    continue;
                }
            }

            // The claim is the serialization point: losing the race to
            // another poller is expected and skipped silently.
            if !self.queue.claim(item.id, &server_uuid).await? {
                continue;
            }

            *batch_usage.entry(server_uuid.clone()).or_insert(0) += 1;

            if let Some(pacer) = pacer.as_mut() {
                pacer.tick().await;
            }

            let permit = semaphore.clone().acquire_owned().await?;
            let job = SendJob {
                queue: self.queue.clone(),
                usage: self.usage.clone(),
                tracking: self.tracking.clone(),
                messenger: self.messenger.clone(),
                settings: settings.clone(),
                window_duration: self.cfg.sliding_window_duration,
            };

            let task_server = server_uuid.clone();
            handles.push(tokio::spawn(async move {
                job.deliver(item, task_server).await;
                drop(permit);
            }));

            if let Some(cap) = capacities.get_mut(&server_uuid) {
                if cap.daily_limit > 0 {
                    cap.daily_remaining -= 1;
                    if cap.daily_remaining <= 0 {
                        cap.can_send_now = false;
                    }
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("send task panicked: {}", e);
            }
        }

        if let Err(e) = self.finish_completed_campaigns().await {
            error!("error checking completed campaigns: {}", e);
        }

        Ok(())
    }

    /// Whether the wall clock in the configured timezone is inside the send
    /// window
    fn within_time_window(&self, settings: &Settings) -> bool {
        let window = self.cfg.send_window();
        if window.is_unbounded() {
            return true;
        }

        match settings.timezone.parse::<Tz>() {
            Ok(tz) => window.contains(&Utc::now().with_timezone(&tz)),
            Err(_) => {
                warn!(
                    "invalid timezone '{}', using system time",
                    settings.timezone
                );
                window.contains(&Utc::now())
            }
        }
    }

    /// Point-in-time capacity for every enabled server
    async fn server_capacities(
        &self,
        settings: &Settings,
    ) -> Result<HashMap<String, ServerCapacity>> {
        let mut capacities = HashMap::new();

        for smtp in settings.smtp.iter().filter(|s| s.enabled) {
            let daily_used = match self.usage.daily_usage(&smtp.uuid).await {
                Ok(n) => n,
                Err(e) => {
                    error!("error getting daily usage for server '{}': {}", smtp.name, e);
                    continue;
                }
            };

            let daily_remaining = if smtp.daily_limit == 0 {
                i32::MAX
            } else {
                smtp.daily_limit - daily_used
            };

            let sliding_window_used = match self.cfg.sliding_window_duration {
                Some(duration) => {
                    match self.usage.sliding_window_usage(&smtp.uuid, duration).await {
                        Ok(n) => n,
                        Err(e) => {
                            error!(
                                "error getting sliding window usage for server '{}': {}",
                                smtp.name, e
                            );
                            continue;
                        }
                    }
                }
                None => 0,
            };

            let limit = self.cfg.sliding_window_limit;
            let can_send_now = (daily_remaining > 0 || smtp.daily_limit == 0)
                && (sliding_window_used < limit || limit == 0);

            capacities.insert(
                smtp.uuid.clone(),
                ServerCapacity {
                    uuid: smtp.uuid.clone(),
                    name: smtp.name.clone(),
                    daily_limit: smtp.daily_limit,
                    daily_used,
                    daily_remaining,
                    sliding_window_limit: limit,
                    sliding_window_used,
                    can_send_now,
                },
            );
        }

        Ok(capacities)
    }

    /// Mark running queue campaigns with no open items as finished
    async fn finish_completed_campaigns(&self) -> Result<()> {
        for (id, name) in self.campaigns.completed_queue_campaigns().await? {
            if let Err(e) = self.campaigns.mark_finished(id).await {
                error!("error marking campaign {} ({}) as finished: {}", id, name, e);
                continue;
            }
            info!(
                "campaign {} ({}) marked as finished, all queued emails processed",
                id, name
            );
        }

        Ok(())
    }
}

/// Everything one send task needs, detached from the processor's lifetime
struct SendJob {
    queue: QueueRepository,
    usage: UsageRepository,
    tracking: MessageTrackingRepository,
    messenger: Arc<dyn Messenger>,
    settings: Settings,
    window_duration: Option<std::time::Duration>,
}

impl SendJob {
    async fn deliver(&self, item: QueueItem, server_uuid: String) {
        // The account-wide limit is checked right before the send so a
        // saturated window reverts the item instead of burning the claim.
        match self.check_account_rate_limit().await {
            Ok(true) => {}
            Ok(false) => {
                debug!("skipping email {} due to account-wide rate limit", item.id);
                if let Err(e) = self.queue.requeue(item.id).await {
                    error!("error resetting email {} to queued: {}", item.id, e);
                }
                return;
            }
            Err(e) => {
                error!("error checking account rate limit: {}", e);
                let msg = format!("account rate limit check failed: {}", e);
                if let Err(e) = self.queue.mark_failed(item.id, &msg).await {
                    error!("error marking email {} as failed: {}", item.id, e);
                }
                return;
            }
        }

        let provider_message_id = match self
            .messenger
            .push(item.campaign_id, item.subscriber_id, &server_uuid)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(
                    "error sending email {} (campaign {}, subscriber {}) via server {}: {}",
                    item.id, item.campaign_id, item.subscriber_id, server_uuid, e
                );
                if let Err(e) = self.queue.mark_failed(item.id, &e.to_string()).await {
                    error!("error marking email {} as failed: {}", item.id, e);
                }
                return;
            }
        };

        if let Err(e) = self.queue.mark_sent(item.id).await {
            error!("error marking email {} as sent: {}", item.id, e);
            return;
        }

        debug!(
            "email {} (campaign {}, subscriber {}) delivered via server {}",
            item.id, item.campaign_id, item.subscriber_id, server_uuid
        );

        // Tracking rows power webhook correlation later on.
        if let Some(provider_id) = provider_message_id {
            if let Err(e) = self
                .tracking
                .insert(&provider_id, item.campaign_id, item.subscriber_id)
                .await
            {
                error!(
                    "error tracking provider message id for email {}: {}",
                    item.id, e
                );
            }
        }

        if self.settings.smart_sending_enabled {
            if let Err(e) = self.queue.touch_subscriber_last_send(item.subscriber_id).await {
                error!(
                    "error updating last send for subscriber {}: {}",
                    item.subscriber_id, e
                );
            }
        }

        if let Err(e) = self
            .usage
            .increment_server_usage(&server_uuid, self.window_duration)
            .await
        {
            error!("error incrementing usage for server {}: {}", server_uuid, e);
        }

        if self.settings.account_rate_limit_per_minute > 0
            || self.settings.account_rate_limit_per_hour > 0
        {
            if let Err(e) = self.usage.increment_account_usage().await {
                error!("error incrementing account rate limit: {}", e);
            }
        }
    }

    /// True when the account windows still have room
    async fn check_account_rate_limit(&self) -> Result<bool> {
        let per_minute = self.settings.account_rate_limit_per_minute;
        let per_hour = self.settings.account_rate_limit_per_hour;

        if per_minute <= 0 && per_hour <= 0 {
            return Ok(true);
        }

        let state = match self.usage.account_state().await? {
            Some(state) => state,
            None => return Ok(true),
        };

        let now = Utc::now();

        if per_minute > 0 {
            let elapsed = now - state.minute_window_start;
            if elapsed < chrono::Duration::minutes(1) && state.emails_in_minute >= per_minute {
                debug!(
                    "account-wide rate limit: {} emails in the last minute (limit {})",
                    state.emails_in_minute, per_minute
                );
                return Ok(false);
            }
        }

        if per_hour > 0 {
            let elapsed = now - state.hour_window_start;
            if elapsed < chrono::Duration::hours(1) && state.emails_in_hour >= per_hour {
                debug!(
                    "account-wide rate limit: {} emails in the last hour (limit {})",
                    state.emails_in_hour, per_hour
                );
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Pick the server for an item: its pre-assigned server when that can still
/// send, otherwise the available server with the most daily headroom.
/// Iteration is in uuid order so capacity ties resolve deterministically.
fn select_server(
    capacities: &HashMap<String, ServerCapacity>,
    preferred: Option<&str>,
) -> Option<String> {
    if let Some(uuid) = preferred {
        if let Some(cap) = capacities.get(uuid) {
            if cap.can_send_now {
                return Some(uuid.to_string());
            }
        }
    }

    let mut uuids: Vec<&String> = capacities.keys().collect();
    uuids.sort();

    let mut best: Option<&ServerCapacity> = None;
    for uuid in uuids {
        let cap = &capacities[uuid];
        if !cap.can_send_now {
            continue;
        }
        if best.map_or(true, |b| cap.daily_remaining > b.daily_remaining) {
            best = Some(cap);
        }
    }

    best.map(|cap| cap.uuid.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacity(uuid: &str, remaining: i32, can_send: bool) -> ServerCapacity {
        ServerCapacity {
            uuid: uuid.to_string(),
            name: uuid.to_string(),
            daily_limit: 1000,
            daily_used: 1000 - remaining,
            daily_remaining: remaining,
            sliding_window_limit: 0,
            sliding_window_used: 0,
            can_send_now: can_send,
        }
    }

    fn map(caps: Vec<ServerCapacity>) -> HashMap<String, ServerCapacity> {
        caps.into_iter().map(|c| (c.uuid.clone(), c)).collect()
    }

    #[test]
    fn test_select_prefers_assigned_server() {
        let caps = map(vec![capacity("a", 10, true), capacity("b", 500, true)]);
        assert_eq!(select_server(&caps, Some("a")), Some("a".to_string()));
    }

    #[test]
    fn test_select_falls_back_when_assigned_exhausted() {
        let caps = map(vec![capacity("a", 0, false), capacity("b", 500, true)]);
        assert_eq!(select_server(&caps, Some("a")), Some("b".to_string()));
    }

    #[test]
    fn test_select_picks_most_headroom() {
        let caps = map(vec![
            capacity("a", 10, true),
            capacity("b", 500, true),
            capacity("c", 100, true),
        ]);
        assert_eq!(select_server(&caps, None), Some("b".to_string()));
    }

    #[test]
    fn test_select_tie_breaks_deterministically() {
        let caps = map(vec![capacity("b", 100, true), capacity("a", 100, true)]);
        assert_eq!(select_server(&caps, None), Some("a".to_string()));
    }

    #[test]
    fn test_select_none_when_all_saturated() {
        let caps = map(vec![capacity("a", 0, false), capacity("b", 0, false)]);
        assert_eq!(select_server(&caps, None), None);
    }
}
