//! Run coordinator: single-flight execution of read, aggregate and commit.
//!
//! At most one run touches the store at a time. Snapshot reads run
//! concurrently on the blocking pool, each bounded by the configured read
//! timeout. The commit is always awaited to completion, so a transaction is
//! never abandoned part way. Every run, successful or not, produces a
//! [`RunSummary`] that is logged and handed to each summary sink.

use crate::domain::aggregation::{aggregate, EngineConfig, Stats};
use crate::domain::error::HoldaggError;
use crate::domain::run_summary::RunSummary;
use crate::domain::schedule::{CoordinatorSettings, OverlapPolicy};
use crate::domain::snapshot::InputSnapshot;
use crate::ports::source_port::{LedgerPort, QuotePort, RatePort};
use crate::ports::store_port::AggregationStore;
use crate::ports::summary_port::SummaryPort;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// The three read ports a run takes its snapshot from.
#[derive(Clone)]
pub struct Sources {
    pub ledger: Arc<dyn LedgerPort + Send + Sync>,
    pub quotes: Arc<dyn QuotePort + Send + Sync>,
    pub rates: Arc<dyn RatePort + Send + Sync>,
}

impl Sources {
    /// All three inputs served by one adapter.
    pub fn from_adapter<T>(adapter: Arc<T>) -> Self
    where
        T: LedgerPort + QuotePort + RatePort + Send + Sync + 'static,
    {
        Sources {
            ledger: adapter.clone(),
            quotes: adapter.clone(),
            rates: adapter,
        }
    }
}

type RunResult = Result<RunSummary, HoldaggError>;

#[derive(Default)]
struct FlightState {
    /// Number and result of the most recently finished run.
    last: Option<(u64, RunResult)>,
}

pub struct RunCoordinator {
    sources: Sources,
    store: Arc<dyn AggregationStore + Send + Sync>,
    sinks: Vec<Arc<dyn SummaryPort + Send + Sync>>,
    engine: EngineConfig,
    settings: CoordinatorSettings,
    flight: Mutex<FlightState>,
    /// Runs started so far; the next run id is `started + 1`.
    started: AtomicU64,
    cancel_requested: AtomicBool,
}

impl RunCoordinator {
    pub fn new(
        sources: Sources,
        store: Arc<dyn AggregationStore + Send + Sync>,
        engine: EngineConfig,
        settings: CoordinatorSettings,
    ) -> Self {
        RunCoordinator {
            sources,
            store,
            sinks: Vec::new(),
            engine,
            settings,
            flight: Mutex::new(FlightState::default()),
            started: AtomicU64::new(0),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn SummaryPort + Send + Sync>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Start a run now, subject to the overlap policy.
    ///
    /// A failed run is returned as `Err` after its summary has been emitted.
    /// Under [`OverlapPolicy::Coalesce`], every trigger that arrives while a
    /// run is in flight waits for and shares the result of one follow-up run.
    pub async fn trigger_now(&self) -> RunResult {
        match self.settings.overlap {
            OverlapPolicy::Reject => {
                let Ok(mut state) = self.flight.try_lock() else {
                    log::info!("trigger rejected: a run is already in flight");
                    return Err(HoldaggError::AlreadyRunning);
                };
                self.run_locked(&mut state).await
            }
            OverlapPolicy::Coalesce => {
                let observed = self.started.load(Ordering::SeqCst);
                let mut state = match self.flight.try_lock() {
                    Ok(state) => state,
                    Err(_) => {
                        log::debug!("run in flight, waiting to coalesce");
                        self.flight.lock().await
                    }
                };
                if let Some((run_no, result)) = &state.last {
                    if *run_no > observed {
                        log::debug!("sharing result of run #{run_no}");
                        return result.clone();
                    }
                }
                self.run_locked(&mut state).await
            }
        }
    }

    /// Request cooperative cancellation of the current run.
    ///
    /// Checked before each stage; a run already committing is unaffected.
    pub fn cancel_in_flight(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Whether a run currently holds the single-flight guard.
    pub fn is_running(&self) -> bool {
        self.flight.try_lock().is_err()
    }

    async fn run_locked(&self, state: &mut FlightState) -> RunResult {
        let run_id = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_requested.store(false, Ordering::SeqCst);

        let started_at = Utc::now();
        let clock = Instant::now();
        let result = self.execute(run_id).await;
        let summary = RunSummary::new(run_id, started_at, clock.elapsed(), &result);

        self.publish(&summary);

        let outcome = result.map(|_| summary);
        state.last = Some((run_id, outcome.clone()));
        outcome
    }

    async fn execute(&self, run_id: u64) -> Result<Stats, HoldaggError> {
        self.check_cancelled()?;
        let stage = Instant::now();
        let snapshot = self.read_snapshot().await?;
        log::debug!(
            "run #{run_id}: read {} holdings, {} quotes, {} rates in {}ms",
            snapshot.holdings.len(),
            snapshot.quotes.len(),
            snapshot.rates.len(),
            stage.elapsed().as_millis()
        );

        self.check_cancelled()?;
        let stage = Instant::now();
        let aggregation = aggregate(&snapshot, &self.engine)?;
        let stats = aggregation.stats;
        log::debug!(
            "run #{run_id}: aggregated {} instruments in {}ms",
            stats.instrument_count,
            stage.elapsed().as_millis()
        );
        if stats.missing_quote_count > 0 || stats.missing_rate_count > 0 {
            log::warn!(
                "run #{run_id}: {} instruments without a quote, {} without a rate to {}",
                stats.missing_quote_count,
                stats.missing_rate_count,
                self.engine.base_currency
            );
        }

        self.check_cancelled()?;
        let stage = Instant::now();
        let store = Arc::clone(&self.store);
        let rows = aggregation.holdings;
        tokio::task::spawn_blocking(move || store.replace_all(&rows))
            .await
            .map_err(|e| HoldaggError::Commit {
                reason: e.to_string(),
            })??;
        log::debug!(
            "run #{run_id}: committed in {}ms",
            stage.elapsed().as_millis()
        );

        Ok(stats)
    }

    async fn read_snapshot(&self) -> Result<InputSnapshot, HoldaggError> {
        let limit = self.settings.read_timeout;
        let ledger = Arc::clone(&self.sources.ledger);
        let quotes = Arc::clone(&self.sources.quotes);
        let rates = Arc::clone(&self.sources.rates);
        let base = self.engine.base_currency.clone();

        let (holdings, quotes, rates) = tokio::join!(
            read_bounded("ledger", limit, move || ledger.fetch_holdings()),
            read_bounded("quotes", limit, move || quotes.fetch_latest_quotes()),
            read_bounded("rates", limit, move || rates.fetch_rates(&base)),
        );

        Ok(InputSnapshot::new(holdings?, quotes?, rates?))
    }

    fn check_cancelled(&self) -> Result<(), HoldaggError> {
        if self.cancel_requested.load(Ordering::SeqCst) {
            return Err(HoldaggError::Cancelled);
        }
        Ok(())
    }

    fn publish(&self, summary: &RunSummary) {
        if summary.succeeded() {
            log::info!("{summary}");
        } else {
            log::error!("{summary}");
        }

        for sink in &self.sinks {
            if let Err(e) = sink.record(summary) {
                log::warn!("failed to record summary of run #{}: {}", summary.run_id, e);
            }
        }
    }
}

/// Run a blocking read on the blocking pool, bounded by `limit`.
///
/// Failures other than data integrity are reported as `InputUnavailable` for
/// `input`.
async fn read_bounded<T, F>(input: &str, limit: Duration, read: F) -> Result<T, HoldaggError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, HoldaggError> + Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(read)).await {
        Err(_) => Err(HoldaggError::input_unavailable(
            input,
            format!("timed out after {}ms", limit.as_millis()),
        )),
        Ok(Err(join)) => Err(HoldaggError::input_unavailable(input, join.to_string())),
        Ok(Ok(Ok(records))) => Ok(records),
        Ok(Ok(Err(e))) => Err(match e {
            HoldaggError::InputUnavailable { .. } | HoldaggError::DataIntegrity { .. } => e,
            other => HoldaggError::input_unavailable(input, other.to_string()),
        }),
    }
}
