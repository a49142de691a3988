//! Periodic driver for the run coordinator.

use crate::coordinator::RunCoordinator;
use crate::domain::schedule::Schedule;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Handle to a running schedule loop.
pub struct ScheduleHandle {
    stop: watch::Sender<bool>,
    coordinator: Arc<RunCoordinator>,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Stop the loop. An in-flight run is asked to cancel and is awaited
    /// before this returns.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        self.coordinator.cancel_in_flight();
        if let Err(e) = self.task.await {
            log::error!("scheduler task ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn the schedule loop on the current runtime.
///
/// Interval schedules fire immediately and then once per period; ticks missed
/// while a run overran are skipped rather than bunched up.
pub fn start(coordinator: Arc<RunCoordinator>, schedule: Schedule) -> ScheduleHandle {
    let (stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(run_loop(coordinator.clone(), schedule, stop_rx));
    ScheduleHandle {
        stop,
        coordinator,
        task,
    }
}

async fn run_loop(
    coordinator: Arc<RunCoordinator>,
    schedule: Schedule,
    mut stop: watch::Receiver<bool>,
) {
    log::info!("scheduler started, running {}", schedule.describe());

    match schedule {
        Schedule::Interval(period) => {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = timer.tick() => tick(&coordinator).await,
                    _ = stop.changed() => break,
                }
            }
        }
        Schedule::DailyAt(_) => loop {
            let delay = schedule.delay_until_next(Utc::now());
            log::debug!("next scheduled run in {}s", delay.as_secs());
            tokio::select! {
                _ = sleep(delay) => tick(&coordinator).await,
                _ = stop.changed() => break,
            }
        },
    }

    log::info!("scheduler stopped");
}

async fn tick(coordinator: &RunCoordinator) {
    match coordinator.trigger_now().await {
        Ok(_) => {}
        Err(e) if e.is_control_signal() => log::info!("scheduled run skipped: {e}"),
        // already reported by the coordinator
        Err(e) => log::debug!("scheduled run failed, schedule continues: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Sources;
    use crate::domain::error::HoldaggError;
    use crate::domain::aggregation::{AggregatedHolding, EngineConfig};
    use crate::domain::holding::{ExchangeRateRecord, HoldingRecord, QuoteRecord};
    use crate::domain::schedule::{CoordinatorSettings, OverlapPolicy};
    use crate::ports::source_port::{LedgerPort, QuotePort, RatePort};
    use crate::ports::store_port::AggregationStore;
    use chrono::NaiveTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSources {
        reads: AtomicUsize,
    }

    impl LedgerPort for CountingSources {
        fn fetch_holdings(&self) -> Result<Vec<HoldingRecord>, HoldaggError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![HoldingRecord::new("X", "a1", 1.0, 1.0, "USD")])
        }
    }

    impl QuotePort for CountingSources {
        fn fetch_latest_quotes(&self) -> Result<Vec<QuoteRecord>, HoldaggError> {
            Ok(vec![])
        }
    }

    impl RatePort for CountingSources {
        fn fetch_rates(&self, _base: &str) -> Result<Vec<ExchangeRateRecord>, HoldaggError> {
            Ok(vec![])
        }
    }

    struct FailingStore;

    impl AggregationStore for FailingStore {
        fn replace_all(&self, _rows: &[AggregatedHolding]) -> Result<(), HoldaggError> {
            Err(HoldaggError::Commit {
                reason: "database is locked".into(),
            })
        }

        fn load_all(&self) -> Result<Vec<AggregatedHolding>, HoldaggError> {
            Ok(vec![])
        }
    }

    fn coordinator(sources: Arc<CountingSources>) -> Arc<RunCoordinator> {
        Arc::new(RunCoordinator::new(
            Sources::from_adapter(sources),
            Arc::new(FailingStore),
            EngineConfig::new("USD"),
            CoordinatorSettings {
                overlap: OverlapPolicy::Reject,
                read_timeout: Duration::from_secs(5),
            },
        ))
    }

    async fn wait_for_reads(sources: &CountingSources, at_least: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while sources.reads.load(Ordering::SeqCst) < at_least {
            assert!(
                tokio::time::Instant::now() < deadline,
                "scheduler did not reach {at_least} runs"
            );
            sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn keeps_running_after_failed_runs() {
        let sources = Arc::new(CountingSources::default());
        let handle = start(
            coordinator(sources.clone()),
            Schedule::Interval(Duration::from_millis(20)),
        );

        wait_for_reads(&sources, 3).await;
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_further_runs() {
        let sources = Arc::new(CountingSources::default());
        let handle = start(
            coordinator(sources.clone()),
            Schedule::Interval(Duration::from_millis(20)),
        );

        wait_for_reads(&sources, 1).await;
        handle.shutdown().await;
        let after_shutdown = sources.reads.load(Ordering::SeqCst);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(sources.reads.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test]
    async fn daily_schedule_waits_and_shuts_down() {
        let sources = Arc::new(CountingSources::default());
        let now = Utc::now().time();
        let an_hour_ago = now - chrono::Duration::hours(1);
        let at = NaiveTime::from_hms_opt(
            chrono::Timelike::hour(&an_hour_ago),
            chrono::Timelike::minute(&an_hour_ago),
            0,
        )
        .unwrap();

        let handle = start(coordinator(sources.clone()), Schedule::DailyAt(at));
        sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;

        assert_eq!(sources.reads.load(Ordering::SeqCst), 0);
    }
}
