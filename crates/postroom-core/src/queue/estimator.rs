//! Delivery estimator
//!
//! Answers "when will this campaign finish?" from daily capacity, the send
//! window and the global sliding window, without touching the queue itself.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use postroom_common::{Error, Result};
use postroom_storage::models::Settings;
use postroom_storage::repository::UsageRepository;
use postroom_storage::DatabasePool;
use serde::Serialize;
use std::collections::HashMap;

use super::{Config, ServerCapacity};

/// Estimate of a campaign's delivery timeline
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryEstimate {
    pub total_emails: i64,
    pub estimated_start_time: DateTime<Utc>,
    pub estimated_end_time: DateTime<Utc>,
    pub estimated_days: i64,
    pub servers_to_use: usize,
    pub emails_per_server: HashMap<String, i64>,
    pub daily_breakdown: Vec<DailyBreakdown>,
    pub within_single_day: bool,
}

/// Per-day slice of the estimate
#[derive(Debug, Clone, Serialize)]
pub struct DailyBreakdown {
    pub date: DateTime<Utc>,
    pub emails_to_send: i64,
    pub servers_used: usize,
}

/// Delivery estimator
pub struct Estimator {
    usage: UsageRepository,
    cfg: Config,
}

impl Estimator {
    /// Create a new estimator
    pub fn new(db_pool: DatabasePool, cfg: Config) -> Self {
        Self {
            usage: UsageRepository::new(db_pool.pool().clone()),
            cfg,
        }
    }

    /// Estimate when `total_emails` will have been delivered
    pub fn estimate(&self, total_emails: i64, settings: &Settings) -> Result<DeliveryEstimate> {
        let limited: Vec<_> = settings
            .smtp
            .iter()
            .filter(|s| s.enabled && s.daily_limit > 0)
            .collect();

        if limited.is_empty() {
            return Err(Error::Validation(
                "no SMTP servers with daily limits configured".to_string(),
            ));
        }

        let total_daily_capacity: i64 = limited.iter().map(|s| s.daily_limit as i64).sum();
        let window = self.cfg.send_window();
        let sending_hours = window.hours_per_day();

        // The hourly throughput is capped by the sliding window when that is
        // tighter than the daily allowance.
        let mut hourly_capacity = match (self.cfg.sliding_window_duration, self.cfg.sliding_window_limit) {
            (Some(duration), limit) if limit > 0 && !duration.is_zero() => {
                let windows_per_hour = 3600.0 / duration.as_secs_f64();
                (limit as f64 * windows_per_hour) as i64
            }
            _ => 0,
        };

        if hourly_capacity == 0 || sending_hours * hourly_capacity > total_daily_capacity {
            hourly_capacity = (total_daily_capacity / sending_hours).max(1);
        }

        let emails_per_day = (hourly_capacity * sending_hours).min(total_daily_capacity).max(1);
        let days_needed = (total_emails + emails_per_day - 1) / emails_per_day;

        // Proportional split by daily limit.
        let mut emails_per_server = HashMap::new();
        let mut remaining = total_emails;
        for smtp in &limited {
            let share = smtp.daily_limit as f64 / total_daily_capacity as f64;
            let mut server_emails = (total_emails as f64 * share) as i64;
            server_emails = server_emails
                .min(smtp.daily_limit as i64 * days_needed)
                .min(remaining);

            emails_per_server.insert(smtp.name.clone(), server_emails);
            remaining -= server_emails;
            if remaining <= 0 {
                break;
            }
        }

        let tz: Tz = settings.timezone.parse().unwrap_or(chrono_tz::UTC);
        let start = window.next_start(Utc::now().with_timezone(&tz));

        let mut daily_breakdown = Vec::new();
        let mut current = start.clone();
        let mut sent = 0i64;

        for _ in 0..days_needed {
            if sent >= total_emails {
                break;
            }
            let today = emails_per_day.min(total_emails - sent);
            daily_breakdown.push(DailyBreakdown {
                date: current.with_timezone(&Utc),
                emails_to_send: today,
                servers_used: emails_per_server.len(),
            });
            sent += today;
            current = if window.is_unbounded() {
                current + Duration::days(1)
            } else {
                window.next_day_start(current)
            };
        }

        Ok(DeliveryEstimate {
            total_emails,
            estimated_start_time: start.with_timezone(&Utc),
            estimated_end_time: current.with_timezone(&Utc),
            estimated_days: days_needed,
            servers_to_use: emails_per_server.len(),
            emails_per_server,
            daily_breakdown,
            within_single_day: days_needed == 1,
        })
    }

    /// Per-server daily capacity summary for the capacity endpoint
    pub async fn capacity_summary(&self, settings: &Settings) -> Result<Vec<ServerCapacity>> {
        let mut capacities = Vec::new();

        for smtp in settings.smtp.iter().filter(|s| s.enabled) {
            let used = self
                .usage
                .daily_usage(&smtp.uuid)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

            let remaining = (smtp.daily_limit - used).max(0);

            capacities.push(ServerCapacity {
                uuid: smtp.uuid.clone(),
                name: smtp.name.clone(),
                daily_limit: smtp.daily_limit,
                daily_used: used,
                daily_remaining: remaining,
                sliding_window_limit: self.cfg.sliding_window_limit,
                sliding_window_used: 0,
                can_send_now: remaining > 0 || smtp.daily_limit == 0,
            });
        }

        Ok(capacities)
    }
}
