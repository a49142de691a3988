#![allow(dead_code)]

use holdagg::domain::aggregation::{AggregatedHolding, EngineConfig};
use holdagg::domain::error::HoldaggError;
use holdagg::domain::holding::{ExchangeRateRecord, HoldingRecord, QuoteRecord};
use holdagg::domain::run_summary::RunSummary;
use holdagg::domain::snapshot::InputSnapshot;
use holdagg::ports::source_port::{LedgerPort, QuotePort, RatePort};
use holdagg::ports::store_port::AggregationStore;
use holdagg::ports::summary_port::SummaryPort;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory source ports with optional per-input failures.
#[derive(Default)]
pub struct MockSources {
    pub holdings: Vec<HoldingRecord>,
    pub quotes: Vec<QuoteRecord>,
    pub rates: Vec<ExchangeRateRecord>,
    pub failing_input: Option<&'static str>,
    pub reads: AtomicUsize,
}

impl MockSources {
    pub fn new(
        holdings: Vec<HoldingRecord>,
        quotes: Vec<QuoteRecord>,
        rates: Vec<ExchangeRateRecord>,
    ) -> Self {
        Self {
            holdings,
            quotes,
            rates,
            ..Self::default()
        }
    }

    pub fn failing(mut self, input: &'static str) -> Self {
        self.failing_input = Some(input);
        self
    }

    fn check(&self, input: &str) -> Result<(), HoldaggError> {
        if self.failing_input == Some(input) {
            return Err(HoldaggError::Database {
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

impl LedgerPort for MockSources {
    fn fetch_holdings(&self) -> Result<Vec<HoldingRecord>, HoldaggError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check("ledger")?;
        Ok(self.holdings.clone())
    }
}

impl QuotePort for MockSources {
    fn fetch_latest_quotes(&self) -> Result<Vec<QuoteRecord>, HoldaggError> {
        self.check("quotes")?;
        Ok(self.quotes.clone())
    }
}

impl RatePort for MockSources {
    fn fetch_rates(&self, base_currency: &str) -> Result<Vec<ExchangeRateRecord>, HoldaggError> {
        self.check("rates")?;
        Ok(self
            .rates
            .iter()
            .filter(|r| r.to_currency == base_currency)
            .cloned()
            .collect())
    }
}

/// Store keeping the last committed rows in memory.
#[derive(Default)]
pub struct MemoryStore {
    pub rows: Mutex<Vec<AggregatedHolding>>,
    pub commits: AtomicUsize,
}

impl AggregationStore for MemoryStore {
    fn replace_all(&self, rows: &[AggregatedHolding]) -> Result<(), HoldaggError> {
        *self.rows.lock().unwrap() = rows.to_vec();
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<AggregatedHolding>, HoldaggError> {
        Ok(self.rows.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub summaries: Mutex<Vec<RunSummary>>,
}

impl SummaryPort for RecordingSink {
    fn record(&self, summary: &RunSummary) -> Result<(), HoldaggError> {
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

pub fn engine(base: &str) -> EngineConfig {
    EngineConfig::new(base)
}

pub fn snapshot(
    holdings: Vec<HoldingRecord>,
    quotes: Vec<QuoteRecord>,
    rates: Vec<ExchangeRateRecord>,
) -> InputSnapshot {
    InputSnapshot::new(holdings, quotes, rates)
}

/// X held in two accounts: 150 units, 1600 cost, quoted at 15.
pub fn scenario_x() -> (Vec<HoldingRecord>, Vec<QuoteRecord>) {
    (
        vec![
            HoldingRecord::new("X", "acct-1", 100.0, 10.0, "USD"),
            HoldingRecord::new("X", "acct-2", 50.0, 12.0, "USD"),
        ],
        vec![QuoteRecord::new("X", 15.0, "USD")],
    )
}

/// A mixed book: USD and EUR positions, a short, cash and one unquoted line.
pub fn mixed_book() -> InputSnapshot {
    snapshot(
        vec![
            HoldingRecord::new("AAPL", "acct-1", 10.0, 150.0, "USD"),
            HoldingRecord::new("AAPL", "acct-2", 5.0, 170.0, "USD"),
            HoldingRecord::new("SAP", "acct-1", 20.0, 100.0, "EUR"),
            HoldingRecord::new("TSLA", "acct-3", -4.0, 250.0, "USD"),
            HoldingRecord::new("$CASH-USD", "acct-1", 1000.0, 1.0, "USD"),
            HoldingRecord::new("PRIVCO", "acct-2", 100.0, 5.0, "USD"),
        ],
        vec![
            QuoteRecord::new("AAPL", 180.0, "USD"),
            QuoteRecord::new("SAP", 120.0, "EUR"),
            QuoteRecord::new("TSLA", 200.0, "USD"),
        ],
        vec![
            ExchangeRateRecord::new("EUR", "USD", 1.1),
            ExchangeRateRecord::new("EUR", "GBP", 0.85),
        ],
    )
}
