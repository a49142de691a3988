//! Scheduling and single-flight settings.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::time::Duration;

/// What a trigger does when another run is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Fail the new trigger immediately with `AlreadyRunning`.
    #[default]
    Reject,
    /// Wait, then share one follow-up run with every other waiting trigger.
    Coalesce,
}

impl OverlapPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "reject" => Some(OverlapPolicy::Reject),
            "coalesce" => Some(OverlapPolicy::Coalesce),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverlapPolicy::Reject => "reject",
            OverlapPolicy::Coalesce => "coalesce",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub overlap: OverlapPolicy,
    /// Upper bound for each of the three snapshot reads.
    pub read_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        CoordinatorSettings {
            overlap: OverlapPolicy::Reject,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }
}

pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed period; the first tick fires immediately.
    Interval(Duration),
    /// Once a day at a UTC wall-clock time.
    DailyAt(NaiveTime),
}

impl Schedule {
    /// Time to wait from `now` until the next tick.
    pub fn delay_until_next(&self, now: DateTime<Utc>) -> Duration {
        match self {
            Schedule::Interval(period) => *period,
            Schedule::DailyAt(at) => {
                let today = now.date_naive().and_time(*at).and_utc();
                let next = if today > now {
                    today
                } else {
                    today + ChronoDuration::days(1)
                };
                (next - now).to_std().unwrap_or(Duration::ZERO)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Schedule::Interval(period) => format!("every {}s", period.as_secs()),
            Schedule::DailyAt(at) => format!("daily at {} UTC", at.format("%H:%M")),
        }
    }
}
