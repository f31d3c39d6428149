//! Campaign scheduler
//!
//! Assigns every freshly queued item of a campaign a send time and an SMTP
//! server, honoring per-server daily capacity, per-server sliding windows
//! and the configured send window. The distribution itself is a pure
//! function over a capacity snapshot; the repository applies the resulting
//! plan in a single transaction.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use postroom_common::types::{CampaignId, QueueItemId};
use postroom_common::{Error, Result};
use postroom_storage::models::{CampaignStatus, ScheduleAssignment, Settings};
use postroom_storage::repository::{CampaignRepository, QueueRepository, UsageRepository};
use postroom_storage::DatabasePool;
use std::time::Duration;
use tracing::{debug, info};

use super::{Config, SendWindow};

/// Capacity snapshot of one eligible server at scheduling time
#[derive(Debug, Clone)]
pub struct ServerSlot {
    pub uuid: String,
    pub name: String,
    /// 0 means unlimited
    pub daily_limit: i32,
    pub remaining: i32,
    pub sliding_window: bool,
    pub window_duration: Option<Duration>,
    pub window_rate: i32,
}

impl ServerSlot {
    fn has_sliding_window(&self) -> bool {
        self.sliding_window
            && self.window_rate > 0
            && self.window_duration.map_or(false, |d| !d.is_zero())
    }
}

/// Campaign scheduler
pub struct Scheduler {
    queue: QueueRepository,
    usage: UsageRepository,
    campaigns: CampaignRepository,
    cfg: Config,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(db_pool: DatabasePool, cfg: Config) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            queue: QueueRepository::new(pool.clone()),
            usage: UsageRepository::new(pool.clone()),
            campaigns: CampaignRepository::new(pool),
            cfg,
        }
    }

    /// Enqueue a campaign's subscribers and schedule the resulting items.
    /// Returns the number of items scheduled.
    pub async fn start_campaign(
        &self,
        campaign_id: CampaignId,
        settings: &Settings,
    ) -> Result<usize> {
        let campaign = self
            .campaigns
            .get(campaign_id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("campaign {}", campaign_id)))?;

        if !campaign.use_queue {
            return Err(Error::Validation(format!(
                "campaign {} does not use the queue",
                campaign_id
            )));
        }

        let added = self
            .queue
            .enqueue_campaign(campaign_id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        info!("enqueued {} emails for campaign {}", added, campaign_id);

        let scheduled = self.schedule_campaign(campaign_id, settings).await?;

        self.campaigns
            .update_status(campaign_id, CampaignStatus::Running)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(scheduled)
    }

    /// Assign (scheduled_at, server) to every queued item of the campaign
    pub async fn schedule_campaign(
        &self,
        campaign_id: CampaignId,
        settings: &Settings,
    ) -> Result<usize> {
        info!(
            "scheduling campaign {} emails across SMTP servers",
            campaign_id
        );

        let items = self
            .queue
            .unscheduled_items(campaign_id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        if items.is_empty() {
            info!("no emails to schedule for campaign {}", campaign_id);
            return Ok(0);
        }

        let servers = self.eligible_servers(settings).await?;
        if servers.is_empty() {
            return Err(Error::Validation(
                "no SMTP servers available with remaining capacity".to_string(),
            ));
        }

        info!(
            "distributing {} emails across {} SMTP servers",
            items.len(),
            servers.len()
        );

        let tz: Tz = settings.timezone.parse().unwrap_or(chrono_tz::UTC);
        let window = self.cfg.send_window();
        let now = Utc::now().with_timezone(&tz);
        let start = window.next_start(now);

        let total_capacity = total_capacity(&servers);
        let send_rate = calculate_send_rate(
            total_capacity,
            window.hours_per_day(),
            self.cfg.sliding_window_duration,
            self.cfg.sliding_window_limit,
        );

        let immediate = window.is_unbounded() && total_capacity >= items.len() as i64;
        if immediate {
            info!(
                "immediate mode: scheduling all {} emails for now, processor paces sends",
                items.len()
            );
        } else {
            info!(
                "scheduled mode: send rate {} emails/min, starting at {}",
                send_rate, start
            );
        }

        let plan = plan_schedule(&items, &servers, &window, start, send_rate, immediate);

        self.queue
            .apply_schedule(&plan)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        info!(
            "successfully scheduled {} emails for campaign {}",
            plan.len(),
            campaign_id
        );

        Ok(plan.len())
    }

    /// Enabled servers that still have daily capacity (or are unlimited)
    async fn eligible_servers(&self, settings: &Settings) -> Result<Vec<ServerSlot>> {
        let mut servers = Vec::new();

        for smtp in settings.smtp.iter().filter(|s| s.enabled) {
            let used = self
                .usage
                .daily_usage(&smtp.uuid)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

            let remaining = (smtp.daily_limit - used).max(0);
            if remaining == 0 && smtp.daily_limit != 0 {
                debug!("server {} out of daily capacity, skipping", smtp.name);
                continue;
            }

            servers.push(ServerSlot {
                uuid: smtp.uuid.clone(),
                name: smtp.name.clone(),
                daily_limit: smtp.daily_limit,
                remaining,
                sliding_window: smtp.sliding_window,
                window_duration: smtp.window_duration(),
                window_rate: smtp.sliding_window_rate,
            });
        }

        Ok(servers)
    }
}

/// Unlimited servers contribute a large sentinel so immediate mode still
/// triggers with a zero daily limit.
const UNLIMITED_CAPACITY: i64 = 1_000_000;

fn total_capacity(servers: &[ServerSlot]) -> i64 {
    servers
        .iter()
        .map(|s| {
            if s.daily_limit == 0 {
                UNLIMITED_CAPACITY
            } else {
                s.remaining as i64
            }
        })
        .sum()
}

/// Emails per minute the schedule should target
fn calculate_send_rate(
    total_capacity: i64,
    sending_hours_per_day: i64,
    global_window_duration: Option<Duration>,
    global_window_limit: i32,
) -> i32 {
    if total_capacity == 0 || sending_hours_per_day == 0 {
        return 1;
    }

    let emails_per_hour = total_capacity / sending_hours_per_day;
    let mut emails_per_minute = (emails_per_hour / 60).max(1) as i32;

    if let Some(duration) = global_window_duration {
        let window_minutes = (duration.as_secs() / 60) as i32;
        if window_minutes > 0 && global_window_limit > 0 {
            let max_per_minute = global_window_limit / window_minutes;
            if max_per_minute < emails_per_minute {
                emails_per_minute = max_per_minute;
            }
        }
    }

    emails_per_minute
}

struct WindowTracker<Tz: TimeZone> {
    count: i32,
    window_start: DateTime<Tz>,
}

/// Distribute items across servers and time.
///
/// Round-robin over the servers; a server whose sliding window is full is
/// skipped, and when every server is saturated the clock jumps to the
/// nearest window reset. Leaving the send window moves the plan to the next
/// day's window start and resets the per-day trackers.
pub(crate) fn plan_schedule<Tz: TimeZone>(
    item_ids: &[QueueItemId],
    servers: &[ServerSlot],
    window: &SendWindow,
    start: DateTime<Tz>,
    send_rate_per_minute: i32,
    immediate: bool,
) -> Vec<ScheduleAssignment> {
    // Trackers run parallel to the server list.
    let mut trackers: Vec<WindowTracker<Tz>> = servers
        .iter()
        .map(|_| WindowTracker {
            count: 0,
            window_start: start.clone(),
        })
        .collect();

    let mut plan = Vec::with_capacity(item_ids.len());
    let mut current = start.clone();
    let mut server_index = 0usize;

    let step = if send_rate_per_minute > 0 {
        chrono::Duration::milliseconds(60_000 / send_rate_per_minute as i64)
    } else {
        chrono::Duration::seconds(1)
    };

    for &item_id in item_ids {
        let mut chosen: Option<usize> = None;

        for _ in 0..servers.len() {
            let idx = server_index % servers.len();
            let candidate = &servers[idx];

            if candidate.has_sliding_window() {
                let duration = window_chrono(candidate);
                let tracker = &mut trackers[idx];

                if current.clone() - tracker.window_start.clone() >= duration {
                    tracker.count = 0;
                    tracker.window_start = current.clone();
                }

                if tracker.count < candidate.window_rate {
                    chosen = Some(idx);
                    break;
                }
            } else {
                chosen = Some(idx);
                break;
            }

            server_index += 1;
        }

        // Every server is saturated: advance the clock to the nearest
        // window reset, then take whichever server comes up next.
        let chosen = match chosen {
            Some(idx) => idx,
            None => {
                let mut min_reset = chrono::Duration::hours(24);
                for (idx, s) in servers.iter().enumerate() {
                    if !s.has_sliding_window() {
                        continue;
                    }
                    let elapsed = current.clone() - trackers[idx].window_start.clone();
                    let until_reset = window_chrono(s) - elapsed;
                    if until_reset > chrono::Duration::zero() && until_reset < min_reset {
                        min_reset = until_reset;
                    }
                }

                if min_reset > chrono::Duration::zero() && min_reset < chrono::Duration::hours(24) {
                    current = current + min_reset;
                    for (idx, s) in servers.iter().enumerate() {
                        if !s.has_sliding_window() {
                            continue;
                        }
                        let duration = window_chrono(s);
                        let tracker = &mut trackers[idx];
                        if current.clone() - tracker.window_start.clone() >= duration {
                            tracker.count = 0;
                            tracker.window_start = current.clone();
                        }
                    }
                }

                server_index % servers.len()
            }
        };

        plan.push(ScheduleAssignment {
            item_id,
            scheduled_at: current.with_timezone(&Utc),
            smtp_server_uuid: servers[chosen].uuid.clone(),
        });

        trackers[chosen].count += 1;
        server_index += 1;

        if immediate {
            // Everything stays at the start time; pacing happens at send
            // time in the processor.
            current = start.clone();
            continue;
        }

        current = current + step;

        if !window.contains(&current) {
            current = window.next_day_start(current);
            for tracker in trackers.iter_mut() {
                tracker.count = 0;
                tracker.window_start = current.clone();
            }
            server_index = 0;
        }
    }

    plan
}

fn window_chrono(server: &ServerSlot) -> chrono::Duration {
    chrono::Duration::from_std(server.window_duration.unwrap_or_default())
        .unwrap_or_else(|_| chrono::Duration::hours(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(uuid: &str, daily_limit: i32, remaining: i32) -> ServerSlot {
        ServerSlot {
            uuid: uuid.to_string(),
            name: uuid.to_string(),
            daily_limit,
            remaining,
            sliding_window: false,
            window_duration: None,
            window_rate: 0,
        }
    }

    fn windowed_server(uuid: &str, rate: i32, duration_secs: u64) -> ServerSlot {
        ServerSlot {
            uuid: uuid.to_string(),
            name: uuid.to_string(),
            daily_limit: 0,
            remaining: 0,
            sliding_window: true,
            window_duration: Some(Duration::from_secs(duration_secs)),
            window_rate: rate,
        }
    }

    fn start() -> DateTime<Utc> {
        "2026-03-02T10:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_immediate_mode_keeps_start_time_and_splits_evenly() {
        let items: Vec<i64> = (1..=10).collect();
        let servers = vec![server("a", 100, 100), server("b", 100, 100)];
        let window = SendWindow::parse("", "");

        let plan = plan_schedule(&items, &servers, &window, start(), 60, true);

        assert_eq!(plan.len(), 10);
        for a in &plan {
            assert_eq!(a.scheduled_at, start());
        }

        let on_a = plan.iter().filter(|a| a.smtp_server_uuid == "a").count();
        let on_b = plan.iter().filter(|a| a.smtp_server_uuid == "b").count();
        assert_eq!(on_a, 5);
        assert_eq!(on_b, 5);
    }

    #[test]
    fn test_scheduled_mode_spreads_over_time() {
        let items: Vec<i64> = (1..=4).collect();
        let servers = vec![server("a", 100, 100)];
        let window = SendWindow::parse("", "");

        // 2 emails per minute: one every 30 seconds.
        let plan = plan_schedule(&items, &servers, &window, start(), 2, false);

        assert_eq!(plan[0].scheduled_at, start());
        assert_eq!(plan[1].scheduled_at, start() + chrono::Duration::seconds(30));
        assert_eq!(plan[3].scheduled_at, start() + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_sliding_window_saturation_advances_clock() {
        let items: Vec<i64> = (1..=3).collect();
        // One server, two sends allowed per 10 minute window.
        let servers = vec![windowed_server("a", 2, 600)];
        let window = SendWindow::parse("", "");

        // Rate of 60/min would place all three within the first minute, but
        // the third must wait for the window reset.
        let plan = plan_schedule(&items, &servers, &window, start(), 60, false);

        assert_eq!(plan[0].scheduled_at, start());
        assert_eq!(plan[1].scheduled_at, start() + chrono::Duration::seconds(1));
        assert!(plan[2].scheduled_at >= start() + chrono::Duration::seconds(600));
    }

    #[test]
    fn test_saturated_server_skipped_for_free_one() {
        let items: Vec<i64> = (1..=4).collect();
        let servers = vec![windowed_server("a", 1, 3600), server("b", 100, 100)];
        let window = SendWindow::parse("", "");

        let plan = plan_schedule(&items, &servers, &window, start(), 60, false);

        // "a" takes one send, everything else lands on "b" without any
        // clock jump.
        assert_eq!(plan[0].smtp_server_uuid, "a");
        for a in &plan[1..] {
            assert_eq!(a.smtp_server_uuid, "b");
        }
        assert!(plan[3].scheduled_at < start() + chrono::Duration::seconds(10));
    }

    #[test]
    fn test_leaving_send_window_rolls_to_next_day() {
        let items: Vec<i64> = (1..=3).collect();
        let servers = vec![server("a", 100, 100)];
        let window = SendWindow::parse("08:00", "10:00");

        // Start right before the window closes at one email per minute.
        let late: DateTime<Utc> = "2026-03-02T09:59:30Z".parse().unwrap();
        let plan = plan_schedule(&items, &servers, &window, late, 1, false);

        assert_eq!(plan[0].scheduled_at, late);
        // 10:00:30 still counts as "10:00" on the window's minute clock,
        // but the slot after that is outside and moves to the following
        // morning.
        assert_eq!(
            plan[1].scheduled_at,
            "2026-03-02T10:00:30Z".parse::<DateTime<Utc>>().unwrap()
        );
        let next_morning: DateTime<Utc> = "2026-03-03T08:00:00Z".parse().unwrap();
        assert_eq!(plan[2].scheduled_at, next_morning);
    }

    #[test]
    fn test_send_rate_calculation() {
        // 24h window: 14400 capacity -> 600/h -> 10/min.
        assert_eq!(calculate_send_rate(14_400, 24, None, 0), 10);
        // Minimum of one per minute.
        assert_eq!(calculate_send_rate(10, 24, None, 0), 1);
        // Global sliding window clamps: 100 per 10 minutes -> 10/min.
        assert_eq!(
            calculate_send_rate(1_000_000, 24, Some(Duration::from_secs(600)), 100),
            10
        );
        assert_eq!(calculate_send_rate(0, 24, None, 0), 1);
    }

    #[test]
    fn test_total_capacity_with_unlimited_server() {
        let servers = vec![server("a", 0, 0), server("b", 100, 40)];
        assert_eq!(total_capacity(&servers), UNLIMITED_CAPACITY + 40);
    }
}
