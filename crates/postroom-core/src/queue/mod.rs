//! Queue-based delivery engine

pub mod autopause;
pub mod estimator;
pub mod processor;
pub mod scheduler;

mod window;

pub use window::SendWindow;

use postroom_storage::models::Settings;
use std::time::Duration;

/// Worker configuration derived from the static config and runtime settings
/// at startup. The send window strings stay in "HH:MM" form; an empty string
/// disables the window.
#[derive(Debug, Clone)]
pub struct Config {
    /// How often the processor polls for due items
    pub poll_interval: Duration,

    /// How many items one tick may fetch
    pub batch_size: i64,

    /// Send window start, "HH:MM" in the configured timezone
    pub time_window_start: String,

    /// Send window end, "HH:MM" in the configured timezone
    pub time_window_end: String,

    /// Global sliding window duration across all servers
    pub sliding_window_duration: Option<Duration>,

    /// Max emails per global sliding window; 0 disables the cap
    pub sliding_window_limit: i32,
}

impl Config {
    /// Build the worker config from the file config and current settings
    pub fn new(file: &postroom_common::config::QueueConfig, settings: &Settings) -> Self {
        Self {
            poll_interval: Duration::from_secs(file.poll_interval_secs),
            batch_size: file.batch_size,
            time_window_start: settings.time_window_start.clone(),
            time_window_end: settings.time_window_end.clone(),
            sliding_window_duration: settings.window_duration(),
            sliding_window_limit: if settings.sliding_window {
                settings.sliding_window_rate
            } else {
                0
            },
        }
    }

    /// The send window for this worker
    pub fn send_window(&self) -> SendWindow {
        SendWindow::parse(&self.time_window_start, &self.time_window_end)
    }
}

/// Point-in-time capacity snapshot for one SMTP server
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerCapacity {
    pub uuid: String,
    pub name: String,
    /// 0 means unlimited
    pub daily_limit: i32,
    pub daily_used: i32,
    pub daily_remaining: i32,
    pub sliding_window_limit: i32,
    pub sliding_window_used: i32,
    pub can_send_now: bool,
}

/// Per-send pacing delay: the slowest of the message rate and the two
/// account-wide caps wins. None when no rate is configured.
pub fn send_delay(settings: &Settings) -> Option<Duration> {
    let mut delay: Option<Duration> = None;

    if settings.message_rate > 0 {
        delay = Some(Duration::from_secs(1) / settings.message_rate as u32);
    }

    if settings.account_rate_limit_per_minute > 0 {
        let per_minute = Duration::from_secs(60) / settings.account_rate_limit_per_minute as u32;
        if delay.map_or(true, |d| per_minute > d) {
            delay = Some(per_minute);
        }
    }

    if settings.account_rate_limit_per_hour > 0 {
        let per_hour = Duration::from_secs(3600) / settings.account_rate_limit_per_hour as u32;
        if delay.map_or(true, |d| per_hour > d) {
            delay = Some(per_hour);
        }
    }

    delay
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(rate: i32, per_minute: i32, per_hour: i32) -> Settings {
        Settings {
            message_rate: rate,
            account_rate_limit_per_minute: per_minute,
            account_rate_limit_per_hour: per_hour,
            ..Settings::default()
        }
    }

    #[test]
    fn test_send_delay_unconfigured() {
        assert_eq!(send_delay(&settings(0, 0, 0)), None);
    }

    #[test]
    fn test_send_delay_message_rate_only() {
        assert_eq!(
            send_delay(&settings(2, 0, 0)),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_send_delay_minute_cap_clamps_rate() {
        // message_rate alone would allow 1000/s; the 30/min account cap
        // stretches the delay to two seconds.
        assert_eq!(
            send_delay(&settings(1000, 30, 0)),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_send_delay_hour_cap_wins_when_slowest() {
        // 120/min allows one send per 500ms; 3600/hour only one per second.
        assert_eq!(
            send_delay(&settings(0, 120, 3600)),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_worker_config_from_settings() {
        let file = postroom_common::config::QueueConfig {
            poll_interval_secs: 10,
            batch_size: 250,
        };
        let settings = Settings {
            time_window_start: "08:00".to_string(),
            time_window_end: "20:00".to_string(),
            sliding_window: true,
            sliding_window_duration: "30m".to_string(),
            sliding_window_rate: 100,
            ..Settings::default()
        };

        let cfg = Config::new(&file, &settings);
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.batch_size, 250);
        assert_eq!(cfg.sliding_window_duration, Some(Duration::from_secs(1800)));
        assert_eq!(cfg.sliding_window_limit, 100);
        assert!(!cfg.send_window().is_unbounded());

        // A disabled sliding window clears both knobs.
        let cfg = Config::new(
            &file,
            &Settings {
                sliding_window_duration: "30m".to_string(),
                sliding_window_rate: 100,
                ..Settings::default()
            },
        );
        assert_eq!(cfg.sliding_window_duration, None);
        assert_eq!(cfg.sliding_window_limit, 0);
    }
}
