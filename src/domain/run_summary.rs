//! Per-run summary record handed to logging and summary sinks.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use super::aggregation::Stats;
use super::error::HoldaggError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InputUnavailable,
    DataIntegrity,
    Commit,
    Cancelled,
    Other,
}

impl FailureKind {
    pub fn of(err: &HoldaggError) -> Self {
        match err {
            HoldaggError::InputUnavailable { .. } => FailureKind::InputUnavailable,
            HoldaggError::DataIntegrity { .. } => FailureKind::DataIntegrity,
            HoldaggError::Commit { .. } => FailureKind::Commit,
            HoldaggError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InputUnavailable => "input_unavailable",
            FailureKind::DataIntegrity => "data_integrity",
            FailureKind::Commit => "commit",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded(Stats),
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: u64,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: RunOutcome,
}

impl RunSummary {
    pub fn new(
        run_id: u64,
        started_at: DateTime<Utc>,
        duration: Duration,
        result: &Result<Stats, HoldaggError>,
    ) -> Self {
        let outcome = match result {
            Ok(stats) => RunOutcome::Succeeded(stats.clone()),
            Err(err) => RunOutcome::Failed {
                kind: FailureKind::of(err),
                message: err.to_string(),
            },
        };
        RunSummary {
            run_id,
            started_at,
            duration,
            outcome,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded(_))
    }

    pub fn stats(&self) -> Option<&Stats> {
        match &self.outcome {
            RunOutcome::Succeeded(stats) => Some(stats),
            RunOutcome::Failed { .. } => None,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            RunOutcome::Succeeded(s) => write!(
                f,
                "run #{} ok in {}ms: {} instruments, cost {:.2}, value {:.2}, avg P&L {:.2}%, \
                 {} missing quotes, {} missing rates",
                self.run_id,
                self.duration.as_millis(),
                s.instrument_count,
                s.grand_cost,
                s.grand_value,
                s.avg_pl_ratio_pct,
                s.missing_quote_count,
                s.missing_rate_count,
            ),
            RunOutcome::Failed { kind, message } => write!(
                f,
                "run #{} failed in {}ms [{}]: {}",
                self.run_id,
                self.duration.as_millis(),
                kind.as_str(),
                message,
            ),
        }
    }
}

/// One row of the `aggregation_runs` history table.
#[derive(Debug, Clone, PartialEq)]
pub struct RunHistoryEntry {
    pub run_id: u64,
    pub started_at: String,
    pub duration_ms: u64,
    pub succeeded: bool,
    pub failure_kind: Option<String>,
    pub message: Option<String>,
    pub instrument_count: Option<u64>,
}
