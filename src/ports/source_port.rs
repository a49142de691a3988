//! Read ports for the three external input sources.
//!
//! Each call returns a point-in-time snapshot; the engine never re-reads a
//! source within one run.

use crate::domain::error::HoldaggError;
use crate::domain::holding::{ExchangeRateRecord, HoldingRecord, QuoteRecord};

pub trait LedgerPort {
    /// All active positions as of call time.
    fn fetch_holdings(&self) -> Result<Vec<HoldingRecord>, HoldaggError>;
}

pub trait QuotePort {
    /// The latest quote per instrument.
    fn fetch_latest_quotes(&self) -> Result<Vec<QuoteRecord>, HoldaggError>;
}

pub trait RatePort {
    /// The latest rates converting into `base_currency`.
    fn fetch_rates(&self, base_currency: &str) -> Result<Vec<ExchangeRateRecord>, HoldaggError>;
}
