//! CLI definition and dispatch.

use clap::{ArgGroup, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::csv_adapter::{self, CsvAdapter};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::coordinator::{RunCoordinator, Sources};
use crate::domain::aggregation::AggregatedHolding;
use crate::domain::config_validation::{
    build_coordinator_settings, build_engine_config, build_schedule, store_backend, validate_config,
    StoreBackend,
};
use crate::domain::error::HoldaggError;
use crate::domain::holding::{ExchangeRateRecord, HoldingRecord, QuoteRecord};
use crate::domain::run_summary::{RunHistoryEntry, RunSummary};
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::AggregationStore;
use crate::ports::summary_port::SummaryPort;
use crate::scheduler;

#[derive(Parser, Debug)]
#[command(name = "holdagg", about = "Aggregate holdings across accounts into a base currency")]
pub struct Cli {
    /// INI configuration file
    #[arg(short, long, global = true, default_value = "holdagg.ini")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database tables
    Init,
    /// Load CSV files into the source tables
    #[command(group(
        ArgGroup::new("inputs")
            .required(true)
            .multiple(true)
            .args(["holdings", "quotes", "rates"])
    ))]
    Import {
        #[arg(long)]
        holdings: Option<PathBuf>,
        #[arg(long)]
        quotes: Option<PathBuf>,
        #[arg(long)]
        rates: Option<PathBuf>,
    },
    /// Run one aggregation now
    Run {
        /// Read holdings.csv, quotes.csv and rates.csv from this directory
        #[arg(long)]
        csv_dir: Option<PathBuf>,
    },
    /// Run aggregations on the configured schedule until Ctrl-C
    Schedule {
        #[arg(long)]
        csv_dir: Option<PathBuf>,
    },
    /// Print the last committed aggregation
    Show {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Write the last committed aggregation to a CSV file
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print recent runs
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Validate the configuration file
    Validate,
}

pub fn run(cli: Cli) -> ExitCode {
    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = match cli.command {
        Command::Validate => run_validate(&config),
        Command::Init => run_init(&config),
        Command::Import {
            holdings,
            quotes,
            rates,
        } => run_import(
            &config,
            holdings.as_deref(),
            quotes.as_deref(),
            rates.as_deref(),
        ),
        Command::Run { csv_dir } => run_once(&config, csv_dir.as_deref()),
        Command::Schedule { csv_dir } => run_schedule(&config, csv_dir.as_deref()),
        Command::Show { limit } => run_show(&config, limit),
        Command::Export { output } => run_export(&config, &output),
        Command::History { limit } => run_history(&config, limit),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(&e)
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// The configured database, serving the source tables, the aggregation store
/// and run history.
#[derive(Clone)]
pub enum Backend {
    #[cfg(feature = "sqlite")]
    Sqlite(Arc<crate::adapters::sqlite_adapter::SqliteAdapter>),
    #[cfg(feature = "postgres")]
    Postgres(Arc<crate::adapters::postgres_adapter::PostgresAdapter>),
}

impl Backend {
    pub fn open(config: &dyn ConfigPort) -> Result<Self, HoldaggError> {
        match store_backend(config)? {
            #[cfg(feature = "sqlite")]
            StoreBackend::Sqlite => {
                use crate::adapters::sqlite_adapter::SqliteAdapter;
                Ok(Backend::Sqlite(Arc::new(SqliteAdapter::from_config(config)?)))
            }
            #[cfg(feature = "postgres")]
            StoreBackend::Postgres => {
                use crate::adapters::postgres_adapter::PostgresAdapter;
                Ok(Backend::Postgres(Arc::new(PostgresAdapter::from_config(
                    config,
                )?)))
            }
            #[allow(unreachable_patterns)]
            other => Err(HoldaggError::ConfigInvalid {
                section: "store".to_string(),
                key: "backend".to_string(),
                reason: format!("{other:?} support is not compiled in"),
            }),
        }
    }

    pub fn initialize_schema(&self) -> Result<(), HoldaggError> {
        match self {
            #[cfg(feature = "sqlite")]
            Backend::Sqlite(a) => a.initialize_schema(),
            #[cfg(feature = "postgres")]
            Backend::Postgres(a) => a.initialize_schema(),
        }
    }

    pub fn replace_holdings(&self, holdings: &[HoldingRecord]) -> Result<(), HoldaggError> {
        match self {
            #[cfg(feature = "sqlite")]
            Backend::Sqlite(a) => a.replace_holdings(holdings),
            #[cfg(feature = "postgres")]
            Backend::Postgres(a) => a.replace_holdings(holdings),
        }
    }

    pub fn insert_quotes(&self, quotes: &[QuoteRecord]) -> Result<(), HoldaggError> {
        let now = chrono::Utc::now();
        match self {
            #[cfg(feature = "sqlite")]
            Backend::Sqlite(a) => a.insert_quotes(quotes, now),
            #[cfg(feature = "postgres")]
            Backend::Postgres(a) => a.insert_quotes(quotes, now),
        }
    }

    pub fn insert_rates(&self, rates: &[ExchangeRateRecord]) -> Result<(), HoldaggError> {
        let now = chrono::Utc::now();
        match self {
            #[cfg(feature = "sqlite")]
            Backend::Sqlite(a) => a.insert_rates(rates, now),
            #[cfg(feature = "postgres")]
            Backend::Postgres(a) => a.insert_rates(rates, now),
        }
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunHistoryEntry>, HoldaggError> {
        match self {
            #[cfg(feature = "sqlite")]
            Backend::Sqlite(a) => a.recent_runs(limit),
            #[cfg(feature = "postgres")]
            Backend::Postgres(a) => a.recent_runs(limit),
        }
    }

    pub fn sources(&self) -> Sources {
        match self {
            #[cfg(feature = "sqlite")]
            Backend::Sqlite(a) => Sources::from_adapter(a.clone()),
            #[cfg(feature = "postgres")]
            Backend::Postgres(a) => Sources::from_adapter(a.clone()),
        }
    }

    pub fn store(&self) -> Arc<dyn AggregationStore + Send + Sync> {
        match self {
            #[cfg(feature = "sqlite")]
            Backend::Sqlite(a) => a.clone(),
            #[cfg(feature = "postgres")]
            Backend::Postgres(a) => a.clone(),
        }
    }

    pub fn history_sink(&self) -> Arc<dyn SummaryPort + Send + Sync> {
        match self {
            #[cfg(feature = "sqlite")]
            Backend::Sqlite(a) => a.clone(),
            #[cfg(feature = "postgres")]
            Backend::Postgres(a) => a.clone(),
        }
    }
}

/// Wire a coordinator from configuration. Inputs come from `csv_dir` when
/// given, otherwise from the backend's source tables.
pub fn build_coordinator(
    config: &dyn ConfigPort,
    backend: &Backend,
    csv_dir: Option<&Path>,
) -> Result<RunCoordinator, HoldaggError> {
    let engine = build_engine_config(config)?;
    let settings = build_coordinator_settings(config)?;
    let sources = match csv_dir {
        Some(dir) => Sources::from_adapter(Arc::new(CsvAdapter::from_dir(dir))),
        None => backend.sources(),
    };

    Ok(
        RunCoordinator::new(sources, backend.store(), engine, settings)
            .with_sink(backend.history_sink()),
    )
}

fn runtime() -> Result<tokio::runtime::Runtime, HoldaggError> {
    tokio::runtime::Runtime::new().map_err(|e| HoldaggError::Database {
        reason: format!("failed to start runtime: {e}"),
    })
}

fn run_validate(config: &dyn ConfigPort) -> Result<(), HoldaggError> {
    validate_config(config)?;
    let engine = build_engine_config(config)?;
    let settings = build_coordinator_settings(config)?;
    let schedule = build_schedule(config)?;

    println!("Configuration is valid.");
    println!("  base currency:  {}", engine.base_currency);
    println!("  cash prefix:    {}", engine.cash_prefix);
    println!("  share policy:   {}", engine.share_policy.as_str());
    println!("  overlap:        {}", settings.overlap.as_str());
    println!("  read timeout:   {}ms", settings.read_timeout.as_millis());
    println!("  schedule:       {}", schedule.describe());
    Ok(())
}

fn run_init(config: &dyn ConfigPort) -> Result<(), HoldaggError> {
    let backend = Backend::open(config)?;
    backend.initialize_schema()?;
    eprintln!("Schema initialized");
    Ok(())
}

fn run_import(
    config: &dyn ConfigPort,
    holdings: Option<&Path>,
    quotes: Option<&Path>,
    rates: Option<&Path>,
) -> Result<(), HoldaggError> {
    let backend = Backend::open(config)?;
    backend.initialize_schema()?;

    if let Some(path) = holdings {
        let records = csv_adapter::read_holdings(path)?;
        backend.replace_holdings(&records)?;
        eprintln!("Imported {} holdings from {}", records.len(), path.display());
    }
    if let Some(path) = quotes {
        let records = csv_adapter::read_quotes(path)?;
        backend.insert_quotes(&records)?;
        eprintln!("Imported {} quotes from {}", records.len(), path.display());
    }
    if let Some(path) = rates {
        let records = csv_adapter::read_rates(path)?;
        backend.insert_rates(&records)?;
        eprintln!("Imported {} rates from {}", records.len(), path.display());
    }
    Ok(())
}

fn run_once(config: &dyn ConfigPort, csv_dir: Option<&Path>) -> Result<(), HoldaggError> {
    let backend = Backend::open(config)?;
    backend.initialize_schema()?;
    let coordinator = build_coordinator(config, &backend, csv_dir)?;

    let summary = runtime()?.block_on(coordinator.trigger_now())?;
    print_summary(&summary);
    Ok(())
}

fn run_schedule(config: &dyn ConfigPort, csv_dir: Option<&Path>) -> Result<(), HoldaggError> {
    let backend = Backend::open(config)?;
    backend.initialize_schema()?;
    let schedule = build_schedule(config)?;
    let coordinator = Arc::new(build_coordinator(config, &backend, csv_dir)?);

    let banner = format!(
        "{}, base {}, overlap {}",
        schedule.describe(),
        coordinator.engine_config().base_currency,
        coordinator.settings().overlap.as_str()
    );

    runtime()?.block_on(async move {
        let handle = scheduler::start(coordinator, schedule);
        eprintln!("Scheduler running ({banner}), press Ctrl-C to stop");
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl-C: {e}");
        }
        eprintln!("Stopping scheduler");
        handle.shutdown().await;
    });
    Ok(())
}

fn run_show(config: &dyn ConfigPort, limit: Option<usize>) -> Result<(), HoldaggError> {
    let backend = Backend::open(config)?;
    let rows = backend.store().load_all()?;
    if rows.is_empty() {
        eprintln!("No aggregation committed yet");
        return Ok(());
    }

    let shown = limit.unwrap_or(rows.len()).min(rows.len());
    print!("{}", format_table(&rows[..shown]));
    if shown < rows.len() {
        eprintln!("({} of {} instruments shown)", shown, rows.len());
    }
    Ok(())
}

fn run_export(config: &dyn ConfigPort, output: &Path) -> Result<(), HoldaggError> {
    let backend = Backend::open(config)?;
    let rows = backend.store().load_all()?;
    csv_adapter::write_aggregation(output, &rows)?;
    eprintln!("Wrote {} rows to {}", rows.len(), output.display());
    Ok(())
}

fn run_history(config: &dyn ConfigPort, limit: usize) -> Result<(), HoldaggError> {
    let backend = Backend::open(config)?;
    for entry in backend.recent_runs(limit)? {
        let status = if entry.succeeded {
            format!("ok, {} instruments", entry.instrument_count.unwrap_or(0))
        } else {
            format!(
                "failed [{}]: {}",
                entry.failure_kind.as_deref().unwrap_or("other"),
                entry.message.as_deref().unwrap_or("")
            )
        };
        println!(
            "#{:<6} {}  {:>7}ms  {}",
            entry.run_id, entry.started_at, entry.duration_ms, status
        );
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Run #{} finished in {}ms", summary.run_id, summary.duration.as_millis());
    if let Some(stats) = summary.stats() {
        println!("  instruments:      {}", stats.instrument_count);
        println!("  total quantity:   {:.4}", stats.total_quantity_sum);
        println!("  grand cost:       {:.2}", stats.grand_cost);
        println!("  grand value:      {:.2}", stats.grand_value);
        println!("  avg P&L:          {:.2}%", stats.avg_pl_ratio_pct);
        println!("  missing quotes:   {}", stats.missing_quote_count);
        println!("  missing rates:    {}", stats.missing_rate_count);
        println!("  cash rows skipped: {}", stats.excluded_cash_count);
    }
}

/// Render rows as a fixed-width table. Degraded rows are marked with `*`.
pub fn format_table(rows: &[AggregatedHolding]) -> String {
    let mut out = format!(
        "{:<16} {:>14} {:>12} {:>16} {:>16} {:>9} {:>7} {:>7} {:>5} {:<5}\n",
        "instrument", "quantity", "avg cost", "cost", "value", "P&L %", "cost %", "value %",
        "accts", "ccy"
    );
    for r in rows {
        let marker = if r.is_degraded() { "*" } else { "" };
        out.push_str(&format!(
            "{:<16} {:>14.4} {:>12.4} {:>16.2} {:>16.2} {:>9.2} {:>7.2} {:>7.2} {:>5} {:<5}\n",
            format!("{}{}", r.instrument_id, marker),
            r.total_quantity,
            r.weighted_avg_cost,
            r.cost_in_base,
            r.value_in_base,
            r.pl_ratio_pct,
            r.cost_share_pct,
            r.value_share_pct,
            r.account_count,
            r.original_currency
        ));
    }
    out
}
