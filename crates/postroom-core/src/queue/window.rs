//! Send window arithmetic
//!
//! The window is a pair of "HH:MM" wall-clock bounds evaluated in the
//! configured timezone. An unconfigured (empty) bound disables the window
//! entirely: sending is allowed around the clock.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike};

/// A daily send window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendWindow {
    start: Option<NaiveTime>,
    end: Option<NaiveTime>,
}

impl SendWindow {
    /// Parse from "HH:MM" strings. Empty or malformed bounds disable the
    /// window, matching the behavior of an unset setting.
    pub fn parse(start: &str, end: &str) -> Self {
        Self {
            start: NaiveTime::parse_from_str(start, "%H:%M").ok(),
            end: NaiveTime::parse_from_str(end, "%H:%M").ok(),
        }
    }

    /// True when no usable window is configured
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() || self.end.is_none()
    }

    /// Whether a local time falls inside the window (inclusive bounds)
    pub fn contains<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> bool {
        let (start, end) = match (self.start, self.end) {
            (Some(s), Some(e)) => (s, e),
            _ => return true,
        };

        let now = t.time();
        let now = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now);
        now >= start && now <= end
    }

    /// How many hours per day sending is allowed
    pub fn hours_per_day(&self) -> i64 {
        let (start, end) = match (self.start, self.end) {
            (Some(s), Some(e)) => (s, e),
            _ => return 24,
        };

        let mut hours = (end - start).num_hours();
        if hours < 0 {
            hours += 24;
        }
        if hours == 0 {
            hours = 24;
        }
        hours
    }

    /// The next moment sending may start, at or after `now`
    pub fn next_start<Tz: TimeZone>(&self, now: DateTime<Tz>) -> DateTime<Tz> {
        let start = match self.start {
            Some(s) => s,
            None => return now,
        };

        let today_start = now
            .clone()
            .with_time(start)
            .single()
            .unwrap_or_else(|| now.clone());

        if now >= today_start && self.contains(&now) {
            return now;
        }

        if now > today_start {
            return today_start + Duration::days(1);
        }

        today_start
    }

    /// The start of the window on the day after `t`
    pub fn next_day_start<Tz: TimeZone>(&self, t: DateTime<Tz>) -> DateTime<Tz> {
        let start = match self.start {
            Some(s) => s,
            None => return t,
        };

        let today_start = t.clone().with_time(start).single().unwrap_or_else(|| t.clone());
        if t < today_start {
            today_start
        } else {
            today_start + Duration::days(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(hms: &str) -> DateTime<Utc> {
        format!("2026-03-02T{}Z", hms).parse().unwrap()
    }

    #[test]
    fn test_unbounded_window() {
        let w = SendWindow::parse("", "");
        assert!(w.is_unbounded());
        assert!(w.contains(&at("03:00:00")));
        assert_eq!(w.hours_per_day(), 24);
        assert_eq!(w.next_start(at("03:00:00")), at("03:00:00"));
    }

    #[test]
    fn test_contains() {
        let w = SendWindow::parse("08:00", "20:00");
        assert!(!w.contains(&at("07:59:00")));
        assert!(w.contains(&at("08:00:00")));
        assert!(w.contains(&at("13:30:00")));
        assert!(w.contains(&at("20:00:00")));
        assert!(!w.contains(&at("20:01:00")));
        assert!(!w.contains(&at("23:00:00")));
    }

    #[test]
    fn test_hours_per_day() {
        assert_eq!(SendWindow::parse("08:00", "20:00").hours_per_day(), 12);
        // Overnight windows wrap.
        assert_eq!(SendWindow::parse("22:00", "06:00").hours_per_day(), 8);
        assert_eq!(SendWindow::parse("", "20:00").hours_per_day(), 24);
    }

    #[test]
    fn test_next_start_before_window() {
        let w = SendWindow::parse("08:00", "20:00");
        assert_eq!(w.next_start(at("05:00:00")), at("08:00:00"));
    }

    #[test]
    fn test_next_start_inside_window() {
        let w = SendWindow::parse("08:00", "20:00");
        assert_eq!(w.next_start(at("09:15:00")), at("09:15:00"));
    }

    #[test]
    fn test_next_start_after_window_rolls_over() {
        let w = SendWindow::parse("08:00", "20:00");
        let next = w.next_start(at("21:00:00"));
        assert_eq!(next, "2026-03-03T08:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_next_day_start() {
        let w = SendWindow::parse("08:00", "20:00");
        assert_eq!(
            w.next_day_start(at("20:05:00")),
            "2026-03-03T08:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(w.next_day_start(at("05:00:00")), at("08:00:00"));
    }
}
