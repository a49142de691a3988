//! SQLite adapter: source tables, the aggregation store and run history.

use crate::domain::aggregation::AggregatedHolding;
use crate::domain::error::HoldaggError;
use crate::domain::holding::{normalize_currency, ExchangeRateRecord, HoldingRecord, QuoteRecord};
use crate::domain::run_summary::{RunHistoryEntry, RunOutcome, RunSummary};
use crate::ports::config_port::ConfigPort;
use crate::ports::source_port::{LedgerPort, QuotePort, RatePort};
use crate::ports::store_port::AggregationStore;
use crate::ports::summary_port::SummaryPort;
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::{params, Row, TransactionBehavior};
use std::time::Duration;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS holdings (
        instrument_id TEXT NOT NULL,
        account_id TEXT NOT NULL,
        quantity REAL NOT NULL,
        cost_per_unit REAL NOT NULL,
        currency TEXT NOT NULL,
        PRIMARY KEY (account_id, instrument_id)
    );
    CREATE TABLE IF NOT EXISTS quotes (
        instrument_id TEXT NOT NULL,
        price REAL NOT NULL,
        currency TEXT NOT NULL,
        quoted_at TEXT NOT NULL,
        PRIMARY KEY (instrument_id, quoted_at)
    );
    CREATE TABLE IF NOT EXISTS exchange_rates (
        from_currency TEXT NOT NULL,
        to_currency TEXT NOT NULL,
        rate REAL NOT NULL,
        as_of TEXT NOT NULL,
        PRIMARY KEY (from_currency, to_currency, as_of)
    );
    CREATE TABLE IF NOT EXISTS aggregated_holdings (
        instrument_id TEXT PRIMARY KEY,
        rank INTEGER NOT NULL,
        total_quantity REAL NOT NULL,
        weighted_avg_cost REAL NOT NULL,
        total_cost_original REAL NOT NULL,
        current_price REAL NOT NULL,
        cost_in_base REAL NOT NULL,
        value_in_base REAL NOT NULL,
        pl_ratio_pct REAL NOT NULL,
        cost_share_pct REAL NOT NULL,
        value_share_pct REAL NOT NULL,
        account_count INTEGER NOT NULL,
        original_currency TEXT NOT NULL,
        quote_missing INTEGER NOT NULL,
        rate_missing INTEGER NOT NULL,
        committed_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS aggregation_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id INTEGER NOT NULL,
        started_at TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        succeeded INTEGER NOT NULL,
        failure_kind TEXT,
        message TEXT,
        instrument_count INTEGER,
        grand_cost REAL,
        grand_value REAL,
        missing_quote_count INTEGER,
        missing_rate_count INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_quotes_instrument ON quotes(instrument_id, quoted_at);
    CREATE INDEX IF NOT EXISTS idx_rates_pair ON exchange_rates(from_currency, to_currency, as_of);";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, HoldaggError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| HoldaggError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;
        let busy_timeout = config.get_millis("sqlite", "busy_timeout_ms", 5_000);

        Self::open_file(&db_path, pool_size, busy_timeout)
    }

    /// Opens a file database in WAL mode so readers never wait on a commit.
    pub fn open_file(
        db_path: &str,
        pool_size: u32,
        busy_timeout: Duration,
    ) -> Result<Self, HoldaggError> {
        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            Ok(())
        });
        let pool =
            Pool::builder()
                .max_size(pool_size)
                .build(manager)
                .map_err(|e: r2d2::Error| HoldaggError::Database {
                    reason: e.to_string(),
                })?;

        log::debug!("opened sqlite database {db_path} (pool size {pool_size})");
        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, HoldaggError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| HoldaggError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, HoldaggError> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| HoldaggError::Database {
                reason: e.to_string(),
            })
    }

    pub fn initialize_schema(&self) -> Result<(), HoldaggError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)
            .map_err(|e: rusqlite::Error| HoldaggError::DatabaseQuery {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Replace the whole ledger in one transaction.
    pub fn replace_holdings(&self, holdings: &[HoldingRecord]) -> Result<(), HoldaggError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;

        tx.execute("DELETE FROM holdings", []).map_err(query_error)?;
        for h in holdings {
            tx.execute(
                "INSERT OR REPLACE INTO holdings (instrument_id, account_id, quantity, cost_per_unit, currency)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![h.instrument_id, h.account_id, h.quantity, h.cost_per_unit, h.currency],
            )
            .map_err(query_error)?;
        }

        tx.commit().map_err(query_error)?;
        Ok(())
    }

    pub fn insert_quotes(
        &self,
        quotes: &[QuoteRecord],
        quoted_at: DateTime<Utc>,
    ) -> Result<(), HoldaggError> {
        let stamp = quoted_at.format(TIMESTAMP_FORMAT).to_string();
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;

        for q in quotes {
            tx.execute(
                "INSERT OR REPLACE INTO quotes (instrument_id, price, currency, quoted_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![q.instrument_id, q.price, q.currency, stamp],
            )
            .map_err(query_error)?;
        }

        tx.commit().map_err(query_error)?;
        Ok(())
    }

    pub fn insert_rates(
        &self,
        rates: &[ExchangeRateRecord],
        as_of: DateTime<Utc>,
    ) -> Result<(), HoldaggError> {
        let stamp = as_of.format(TIMESTAMP_FORMAT).to_string();
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;

        for r in rates {
            tx.execute(
                "INSERT OR REPLACE INTO exchange_rates (from_currency, to_currency, rate, as_of)
                 VALUES (?1, ?2, ?3, ?4)",
                params![r.from_currency, r.to_currency, r.rate, stamp],
            )
            .map_err(query_error)?;
        }

        tx.commit().map_err(query_error)?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunHistoryEntry>, HoldaggError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, started_at, duration_ms, succeeded, failure_kind, message, instrument_count
                 FROM aggregation_runs
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(query_error)?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RunHistoryEntry {
                    run_id: row.get::<_, i64>(0)? as u64,
                    started_at: row.get(1)?,
                    duration_ms: row.get::<_, i64>(2)? as u64,
                    succeeded: row.get(3)?,
                    failure_kind: row.get(4)?,
                    message: row.get(5)?,
                    instrument_count: row.get::<_, Option<i64>>(6)?.map(|n| n as u64),
                })
            })
            .map_err(query_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }
}

fn query_error(e: rusqlite::Error) -> HoldaggError {
    HoldaggError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn unavailable(input: &str, e: impl std::fmt::Display) -> HoldaggError {
    HoldaggError::input_unavailable(input, e.to_string())
}

fn commit_error(e: impl std::fmt::Display) -> HoldaggError {
    HoldaggError::Commit {
        reason: e.to_string(),
    }
}

/// Reads a numeric column; anything that is not a number comes back as NaN
/// so the engine can reject the record with its identity attached.
fn read_number(row: &Row<'_>, idx: usize) -> rusqlite::Result<f64> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Real(v) => v,
        ValueRef::Integer(v) => v as f64,
        _ => f64::NAN,
    })
}

impl LedgerPort for SqliteAdapter {
    fn fetch_holdings(&self) -> Result<Vec<HoldingRecord>, HoldaggError> {
        let conn = self.conn().map_err(|e| unavailable("ledger", e))?;

        let mut stmt = conn
            .prepare(
                "SELECT instrument_id, account_id, quantity, cost_per_unit, currency
                 FROM holdings
                 ORDER BY instrument_id, account_id",
            )
            .map_err(|e| unavailable("ledger", e))?;

        let rows = stmt
            .query_map([], |row| {
                let currency: String = row.get(4)?;
                Ok(HoldingRecord {
                    instrument_id: row.get(0)?,
                    account_id: row.get(1)?,
                    quantity: read_number(row, 2)?,
                    cost_per_unit: read_number(row, 3)?,
                    currency: normalize_currency(&currency),
                })
            })
            .map_err(|e| unavailable("ledger", e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| unavailable("ledger", e))
    }
}

impl QuotePort for SqliteAdapter {
    fn fetch_latest_quotes(&self) -> Result<Vec<QuoteRecord>, HoldaggError> {
        let conn = self.conn().map_err(|e| unavailable("quotes", e))?;

        let mut stmt = conn
            .prepare(
                "SELECT q.instrument_id, q.price, q.currency
                 FROM quotes q
                 WHERE q.quoted_at = (
                     SELECT MAX(quoted_at) FROM quotes WHERE instrument_id = q.instrument_id
                 )
                 ORDER BY q.instrument_id",
            )
            .map_err(|e| unavailable("quotes", e))?;

        let rows = stmt
            .query_map([], |row| {
                let currency: String = row.get(2)?;
                Ok(QuoteRecord {
                    instrument_id: row.get(0)?,
                    price: read_number(row, 1)?,
                    currency: normalize_currency(&currency),
                })
            })
            .map_err(|e| unavailable("quotes", e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| unavailable("quotes", e))
    }
}

impl RatePort for SqliteAdapter {
    fn fetch_rates(&self, base_currency: &str) -> Result<Vec<ExchangeRateRecord>, HoldaggError> {
        let conn = self.conn().map_err(|e| unavailable("rates", e))?;

        let mut stmt = conn
            .prepare(
                "SELECT r.from_currency, r.to_currency, r.rate
                 FROM exchange_rates r
                 WHERE r.to_currency = ?1
                   AND r.as_of = (
                       SELECT MAX(as_of) FROM exchange_rates
                       WHERE from_currency = r.from_currency AND to_currency = r.to_currency
                   )
                 ORDER BY r.from_currency",
            )
            .map_err(|e| unavailable("rates", e))?;

        let base = normalize_currency(base_currency);
        let rows = stmt
            .query_map(params![base], |row| {
                let from: String = row.get(0)?;
                let to: String = row.get(1)?;
                Ok(ExchangeRateRecord {
                    from_currency: normalize_currency(&from),
                    to_currency: normalize_currency(&to),
                    rate: read_number(row, 2)?,
                })
            })
            .map_err(|e| unavailable("rates", e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| unavailable("rates", e))
    }
}

impl AggregationStore for SqliteAdapter {
    fn replace_all(&self, rows: &[AggregatedHolding]) -> Result<(), HoldaggError> {
        let mut conn = self.conn().map_err(commit_error)?;
        let committed_at = Utc::now().format(TIMESTAMP_FORMAT).to_string();

        // Dropping `tx` on any early return rolls the whole replacement back.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(commit_error)?;

        tx.execute("DELETE FROM aggregated_holdings", [])
            .map_err(commit_error)?;

        {
            let mut insert = tx
                .prepare(
                    "INSERT INTO aggregated_holdings (
                        instrument_id, rank, total_quantity, weighted_avg_cost, total_cost_original,
                        current_price, cost_in_base, value_in_base, pl_ratio_pct, cost_share_pct,
                        value_share_pct, account_count, original_currency, quote_missing,
                        rate_missing, committed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                )
                .map_err(commit_error)?;

            for (rank, h) in rows.iter().enumerate() {
                insert
                    .execute(params![
                        h.instrument_id,
                        rank as i64,
                        h.total_quantity,
                        h.weighted_avg_cost,
                        h.total_cost_original,
                        h.current_price,
                        h.cost_in_base,
                        h.value_in_base,
                        h.pl_ratio_pct,
                        h.cost_share_pct,
                        h.value_share_pct,
                        h.account_count as i64,
                        h.original_currency,
                        h.quote_missing,
                        h.rate_missing,
                        committed_at,
                    ])
                    .map_err(commit_error)?;
            }
        }

        tx.commit().map_err(commit_error)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<AggregatedHolding>, HoldaggError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT instrument_id, total_quantity, weighted_avg_cost, total_cost_original,
                        current_price, cost_in_base, value_in_base, pl_ratio_pct, cost_share_pct,
                        value_share_pct, account_count, original_currency, quote_missing, rate_missing
                 FROM aggregated_holdings
                 ORDER BY rank ASC",
            )
            .map_err(query_error)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(AggregatedHolding {
                    instrument_id: row.get(0)?,
                    total_quantity: row.get(1)?,
                    weighted_avg_cost: row.get(2)?,
                    total_cost_original: row.get(3)?,
                    current_price: row.get(4)?,
                    cost_in_base: row.get(5)?,
                    value_in_base: row.get(6)?,
                    pl_ratio_pct: row.get(7)?,
                    cost_share_pct: row.get(8)?,
                    value_share_pct: row.get(9)?,
                    account_count: row.get::<_, i64>(10)? as usize,
                    original_currency: row.get(11)?,
                    quote_missing: row.get(12)?,
                    rate_missing: row.get(13)?,
                })
            })
            .map_err(query_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }
}

impl SummaryPort for SqliteAdapter {
    fn record(&self, summary: &RunSummary) -> Result<(), HoldaggError> {
        let conn = self.conn()?;
        let started_at = summary.started_at.format(TIMESTAMP_FORMAT).to_string();
        let duration_ms = summary.duration.as_millis() as i64;

        let inserted = match &summary.outcome {
            RunOutcome::Succeeded(stats) => conn.execute(
                "INSERT INTO aggregation_runs (run_id, started_at, duration_ms, succeeded,
                     instrument_count, grand_cost, grand_value, missing_quote_count, missing_rate_count)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?8)",
                params![
                    summary.run_id as i64,
                    started_at,
                    duration_ms,
                    stats.instrument_count as i64,
                    stats.grand_cost,
                    stats.grand_value,
                    stats.missing_quote_count as i64,
                    stats.missing_rate_count as i64,
                ],
            ),
            RunOutcome::Failed { kind, message } => conn.execute(
                "INSERT INTO aggregation_runs (run_id, started_at, duration_ms, succeeded,
                     failure_kind, message)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                params![
                    summary.run_id as i64,
                    started_at,
                    duration_ms,
                    kind.as_str(),
                    message,
                ],
            ),
        };
        inserted.map_err(query_error)?;

        Ok(())
    }
}
