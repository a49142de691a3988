//! Configuration validation.
//!
//! Builds the typed engine, coordinator and schedule settings from a
//! [`ConfigPort`], rejecting invalid values before any run starts.

use crate::domain::aggregation::{EngineConfig, SharePolicy};
use crate::domain::error::HoldaggError;
use crate::domain::holding::{normalize_currency, DEFAULT_CASH_PREFIX};
use crate::domain::schedule::{
    CoordinatorSettings, OverlapPolicy, Schedule, DEFAULT_INTERVAL_SECS, DEFAULT_READ_TIMEOUT_MS,
};
use crate::ports::config_port::ConfigPort;
use chrono::NaiveTime;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Postgres,
}

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), HoldaggError> {
    build_engine_config(config)?;
    build_coordinator_settings(config)?;
    build_schedule(config)?;
    store_backend(config)?;
    Ok(())
}

pub fn build_engine_config(config: &dyn ConfigPort) -> Result<EngineConfig, HoldaggError> {
    let base_currency = validate_base_currency(config)?;
    let cash_prefix = config
        .get_string("engine", "cash_prefix")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| DEFAULT_CASH_PREFIX.to_string());
    let share_policy = match config.get_string("engine", "share_policy") {
        None => SharePolicy::default(),
        Some(value) => SharePolicy::parse(&value).ok_or_else(|| HoldaggError::ConfigInvalid {
            section: "engine".to_string(),
            key: "share_policy".to_string(),
            reason: format!("expected all or complete_only, got {value:?}"),
        })?,
    };

    Ok(EngineConfig {
        base_currency,
        cash_prefix,
        share_policy,
    })
}

fn validate_base_currency(config: &dyn ConfigPort) -> Result<String, HoldaggError> {
    let raw = config
        .get_string("engine", "base_currency")
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| HoldaggError::ConfigMissing {
            section: "engine".to_string(),
            key: "base_currency".to_string(),
        })?;

    let code = normalize_currency(&raw);
    let well_formed =
        (3..=5).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric());
    if !well_formed {
        return Err(HoldaggError::ConfigInvalid {
            section: "engine".to_string(),
            key: "base_currency".to_string(),
            reason: format!("{raw:?} is not a currency code"),
        });
    }
    Ok(code)
}

pub fn build_coordinator_settings(
    config: &dyn ConfigPort,
) -> Result<CoordinatorSettings, HoldaggError> {
    let overlap = match config.get_string("schedule", "overlap") {
        None => OverlapPolicy::default(),
        Some(value) => OverlapPolicy::parse(&value).ok_or_else(|| HoldaggError::ConfigInvalid {
            section: "schedule".to_string(),
            key: "overlap".to_string(),
            reason: format!("expected reject or coalesce, got {value:?}"),
        })?,
    };

    let timeout_ms = config.get_int("schedule", "read_timeout_ms", DEFAULT_READ_TIMEOUT_MS as i64);
    if timeout_ms <= 0 {
        return Err(HoldaggError::ConfigInvalid {
            section: "schedule".to_string(),
            key: "read_timeout_ms".to_string(),
            reason: "read_timeout_ms must be positive".to_string(),
        });
    }

    Ok(CoordinatorSettings {
        overlap,
        read_timeout: Duration::from_millis(timeout_ms as u64),
    })
}

pub fn build_schedule(config: &dyn ConfigPort) -> Result<Schedule, HoldaggError> {
    let interval = config.get_string("schedule", "interval_secs");
    let daily_at = config.get_string("schedule", "daily_at");

    match (interval, daily_at) {
        (Some(_), Some(_)) => Err(HoldaggError::ConfigInvalid {
            section: "schedule".to_string(),
            key: "daily_at".to_string(),
            reason: "set either interval_secs or daily_at, not both".to_string(),
        }),
        (None, Some(at)) => NaiveTime::parse_from_str(at.trim(), "%H:%M")
            .map(Schedule::DailyAt)
            .map_err(|_| HoldaggError::ConfigInvalid {
                section: "schedule".to_string(),
                key: "daily_at".to_string(),
                reason: "invalid daily_at format, expected HH:MM".to_string(),
            }),
        (Some(_), None) => {
            let secs = config.get_int("schedule", "interval_secs", 0);
            if secs <= 0 {
                return Err(HoldaggError::ConfigInvalid {
                    section: "schedule".to_string(),
                    key: "interval_secs".to_string(),
                    reason: "interval_secs must be a positive integer".to_string(),
                });
            }
            Ok(Schedule::Interval(Duration::from_secs(secs as u64)))
        }
        (None, None) => Ok(Schedule::Interval(Duration::from_secs(
            DEFAULT_INTERVAL_SECS,
        ))),
    }
}

pub fn store_backend(config: &dyn ConfigPort) -> Result<StoreBackend, HoldaggError> {
    match config
        .get_string("store", "backend")
        .map(|s| s.trim().to_lowercase())
        .as_deref()
    {
        None | Some("sqlite") => Ok(StoreBackend::Sqlite),
        Some("postgres") => Ok(StoreBackend::Postgres),
        Some(other) => Err(HoldaggError::ConfigInvalid {
            section: "store".to_string(),
            key: "backend".to_string(),
            reason: format!("unknown backend {other:?}, expected sqlite or postgres"),
        }),
    }
}
