//! Sink for per-run summaries.

use crate::domain::error::HoldaggError;
use crate::domain::run_summary::RunSummary;

pub trait SummaryPort {
    fn record(&self, summary: &RunSummary) -> Result<(), HoldaggError>;
}
