//! PostgreSQL adapter: source tables, the aggregation store and run history.

use crate::domain::aggregation::AggregatedHolding;
use crate::domain::error::HoldaggError;
use crate::domain::holding::{normalize_currency, ExchangeRateRecord, HoldingRecord, QuoteRecord};
use crate::domain::run_summary::{RunHistoryEntry, RunOutcome, RunSummary};
use crate::ports::config_port::ConfigPort;
use crate::ports::source_port::{LedgerPort, QuotePort, RatePort};
use crate::ports::store_port::AggregationStore;
use crate::ports::summary_port::SummaryPort;
use chrono::{DateTime, Utc};
use postgres::types::ToSql;
use postgres::NoTls;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS holdings (
        instrument_id TEXT NOT NULL,
        account_id TEXT NOT NULL,
        quantity DOUBLE PRECISION NOT NULL,
        cost_per_unit DOUBLE PRECISION NOT NULL,
        currency TEXT NOT NULL,
        PRIMARY KEY (account_id, instrument_id)
    );
    CREATE TABLE IF NOT EXISTS quotes (
        instrument_id TEXT NOT NULL,
        price DOUBLE PRECISION NOT NULL,
        currency TEXT NOT NULL,
        quoted_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (instrument_id, quoted_at)
    );
    CREATE TABLE IF NOT EXISTS exchange_rates (
        from_currency TEXT NOT NULL,
        to_currency TEXT NOT NULL,
        rate DOUBLE PRECISION NOT NULL,
        as_of TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (from_currency, to_currency, as_of)
    );
    CREATE TABLE IF NOT EXISTS aggregated_holdings (
        instrument_id TEXT PRIMARY KEY,
        rank BIGINT NOT NULL,
        total_quantity DOUBLE PRECISION NOT NULL,
        weighted_avg_cost DOUBLE PRECISION NOT NULL,
        total_cost_original DOUBLE PRECISION NOT NULL,
        current_price DOUBLE PRECISION NOT NULL,
        cost_in_base DOUBLE PRECISION NOT NULL,
        value_in_base DOUBLE PRECISION NOT NULL,
        pl_ratio_pct DOUBLE PRECISION NOT NULL,
        cost_share_pct DOUBLE PRECISION NOT NULL,
        value_share_pct DOUBLE PRECISION NOT NULL,
        account_count BIGINT NOT NULL,
        original_currency TEXT NOT NULL,
        quote_missing BOOLEAN NOT NULL,
        rate_missing BOOLEAN NOT NULL,
        committed_at TIMESTAMPTZ NOT NULL
    );
    CREATE TABLE IF NOT EXISTS aggregation_runs (
        id BIGSERIAL PRIMARY KEY,
        run_id BIGINT NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        duration_ms BIGINT NOT NULL,
        succeeded BOOLEAN NOT NULL,
        failure_kind TEXT,
        message TEXT,
        instrument_count BIGINT,
        grand_cost DOUBLE PRECISION,
        grand_value DOUBLE PRECISION,
        missing_quote_count BIGINT,
        missing_rate_count BIGINT
    );";

pub struct PostgresAdapter {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

impl PostgresAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, HoldaggError> {
        let conninfo =
            config
                .get_string("postgres", "conninfo")
                .ok_or_else(|| HoldaggError::ConfigMissing {
                    section: "postgres".into(),
                    key: "conninfo".into(),
                })?;
        let pool_size = config.get_int("postgres", "pool_size", 4).max(1) as u32;

        let pg_config = conninfo
            .parse::<postgres::Config>()
            .map_err(|e| HoldaggError::ConfigInvalid {
                section: "postgres".into(),
                key: "conninfo".into(),
                reason: e.to_string(),
            })?;

        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| HoldaggError::Database {
                reason: e.to_string(),
            })?;

        log::debug!("connected to postgres (pool size {pool_size})");
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<PostgresConnectionManager<NoTls>>, HoldaggError> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| HoldaggError::Database {
                reason: e.to_string(),
            })
    }

    pub fn initialize_schema(&self) -> Result<(), HoldaggError> {
        let mut client = self.conn()?;
        client.batch_execute(SCHEMA).map_err(query_error)?;
        Ok(())
    }

    /// Replace the whole ledger in one transaction.
    pub fn replace_holdings(&self, holdings: &[HoldingRecord]) -> Result<(), HoldaggError> {
        let mut client = self.conn()?;
        let mut tx = client.transaction().map_err(query_error)?;

        tx.execute("DELETE FROM holdings", &[]).map_err(query_error)?;
        let insert = tx
            .prepare(
                "INSERT INTO holdings (instrument_id, account_id, quantity, cost_per_unit, currency)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (account_id, instrument_id) DO UPDATE
                 SET quantity = EXCLUDED.quantity,
                     cost_per_unit = EXCLUDED.cost_per_unit,
                     currency = EXCLUDED.currency",
            )
            .map_err(query_error)?;
        for h in holdings {
            tx.execute(
                &insert,
                &[&h.instrument_id, &h.account_id, &h.quantity, &h.cost_per_unit, &h.currency],
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
        let mut client = self.conn()?;
        let mut tx = client.transaction().map_err(query_error)?;

        for q in quotes {
            tx.execute(
                "INSERT INTO quotes (instrument_id, price, currency, quoted_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (instrument_id, quoted_at) DO UPDATE
                 SET price = EXCLUDED.price, currency = EXCLUDED.currency",
                &[&q.instrument_id, &q.price, &q.currency, &quoted_at],
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
        let mut client = self.conn()?;
        let mut tx = client.transaction().map_err(query_error)?;

        for r in rates {
            tx.execute(
                "INSERT INTO exchange_rates (from_currency, to_currency, rate, as_of)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (from_currency, to_currency, as_of) DO UPDATE
                 SET rate = EXCLUDED.rate",
                &[&r.from_currency, &r.to_currency, &r.rate, &as_of],
            )
            .map_err(query_error)?;
        }

        tx.commit().map_err(query_error)?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunHistoryEntry>, HoldaggError> {
        let mut client = self.conn()?;
        let limit = limit as i64;
        let rows = client
            .query(
                "SELECT run_id, started_at, duration_ms, succeeded, failure_kind, message, instrument_count
                 FROM aggregation_runs
                 ORDER BY id DESC
                 LIMIT $1",
                &[&limit],
            )
            .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let started_at: DateTime<Utc> = row.get(1);
                RunHistoryEntry {
                    run_id: row.get::<_, i64>(0) as u64,
                    started_at: started_at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
                    duration_ms: row.get::<_, i64>(2) as u64,
                    succeeded: row.get(3),
                    failure_kind: row.get(4),
                    message: row.get(5),
                    instrument_count: row.get::<_, Option<i64>>(6).map(|n| n as u64),
                }
            })
            .collect())
    }
}

fn query_error(e: postgres::Error) -> HoldaggError {
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

impl LedgerPort for PostgresAdapter {
    fn fetch_holdings(&self) -> Result<Vec<HoldingRecord>, HoldaggError> {
        let mut client = self.conn().map_err(|e| unavailable("ledger", e))?;
        let rows = client
            .query(
                "SELECT instrument_id, account_id, quantity, cost_per_unit, currency
                 FROM holdings
                 ORDER BY instrument_id, account_id",
                &[],
            )
            .map_err(|e| unavailable("ledger", e))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let currency: String = row.get(4);
                HoldingRecord {
                    instrument_id: row.get(0),
                    account_id: row.get(1),
                    quantity: row.get(2),
                    cost_per_unit: row.get(3),
                    currency: normalize_currency(&currency),
                }
            })
            .collect())
    }
}

impl QuotePort for PostgresAdapter {
    fn fetch_latest_quotes(&self) -> Result<Vec<QuoteRecord>, HoldaggError> {
        let mut client = self.conn().map_err(|e| unavailable("quotes", e))?;
        let rows = client
            .query(
                "SELECT DISTINCT ON (instrument_id) instrument_id, price, currency
                 FROM quotes
                 ORDER BY instrument_id, quoted_at DESC",
                &[],
            )
            .map_err(|e| unavailable("quotes", e))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let currency: String = row.get(2);
                QuoteRecord {
                    instrument_id: row.get(0),
                    price: row.get(1),
                    currency: normalize_currency(&currency),
                }
            })
            .collect())
    }
}

impl RatePort for PostgresAdapter {
    fn fetch_rates(&self, base_currency: &str) -> Result<Vec<ExchangeRateRecord>, HoldaggError> {
        let base = normalize_currency(base_currency);
        let mut client = self.conn().map_err(|e| unavailable("rates", e))?;
        let rows = client
            .query(
                "SELECT DISTINCT ON (from_currency) from_currency, to_currency, rate
                 FROM exchange_rates
                 WHERE to_currency = $1
                 ORDER BY from_currency, as_of DESC",
                &[&base],
            )
            .map_err(|e| unavailable("rates", e))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let from: String = row.get(0);
                let to: String = row.get(1);
                ExchangeRateRecord {
                    from_currency: normalize_currency(&from),
                    to_currency: normalize_currency(&to),
                    rate: row.get(2),
                }
            })
            .collect())
    }
}

impl AggregationStore for PostgresAdapter {
    fn replace_all(&self, rows: &[AggregatedHolding]) -> Result<(), HoldaggError> {
        let mut client = self.conn().map_err(commit_error)?;
        let committed_at = Utc::now();

        // Dropping `tx` without commit rolls back.
        let mut tx = client.transaction().map_err(commit_error)?;
        tx.execute("DELETE FROM aggregated_holdings", &[])
            .map_err(commit_error)?;

        let insert = tx
            .prepare(
                "INSERT INTO aggregated_holdings (
                    instrument_id, rank, total_quantity, weighted_avg_cost, total_cost_original,
                    current_price, cost_in_base, value_in_base, pl_ratio_pct, cost_share_pct,
                    value_share_pct, account_count, original_currency, quote_missing,
                    rate_missing, committed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            )
            .map_err(commit_error)?;

        for (rank, h) in rows.iter().enumerate() {
            let rank = rank as i64;
            let account_count = h.account_count as i64;
            let params: &[&(dyn ToSql + Sync)] = &[
                &h.instrument_id,
                &rank,
                &h.total_quantity,
                &h.weighted_avg_cost,
                &h.total_cost_original,
                &h.current_price,
                &h.cost_in_base,
                &h.value_in_base,
                &h.pl_ratio_pct,
                &h.cost_share_pct,
                &h.value_share_pct,
                &account_count,
                &h.original_currency,
                &h.quote_missing,
                &h.rate_missing,
                &committed_at,
            ];
            tx.execute(&insert, params).map_err(commit_error)?;
        }

        tx.commit().map_err(commit_error)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<AggregatedHolding>, HoldaggError> {
        let mut client = self.conn()?;
        let rows = client
            .query(
                "SELECT instrument_id, total_quantity, weighted_avg_cost, total_cost_original,
                        current_price, cost_in_base, value_in_base, pl_ratio_pct, cost_share_pct,
                        value_share_pct, account_count, original_currency, quote_missing, rate_missing
                 FROM aggregated_holdings
                 ORDER BY rank ASC",
                &[],
            )
            .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(|row| AggregatedHolding {
                instrument_id: row.get(0),
                total_quantity: row.get(1),
                weighted_avg_cost: row.get(2),
                total_cost_original: row.get(3),
                current_price: row.get(4),
                cost_in_base: row.get(5),
                value_in_base: row.get(6),
                pl_ratio_pct: row.get(7),
                cost_share_pct: row.get(8),
                value_share_pct: row.get(9),
                account_count: row.get::<_, i64>(10) as usize,
                original_currency: row.get(11),
                quote_missing: row.get(12),
                rate_missing: row.get(13),
            })
            .collect())
    }
}

impl SummaryPort for PostgresAdapter {
    fn record(&self, summary: &RunSummary) -> Result<(), HoldaggError> {
        let mut client = self.conn()?;
        let run_id = summary.run_id as i64;
        let duration_ms = summary.duration.as_millis() as i64;

        let inserted = match &summary.outcome {
            RunOutcome::Succeeded(stats) => {
                let instrument_count = stats.instrument_count as i64;
                let missing_quotes = stats.missing_quote_count as i64;
                let missing_rates = stats.missing_rate_count as i64;
                client.execute(
                    "INSERT INTO aggregation_runs (run_id, started_at, duration_ms, succeeded,
                         instrument_count, grand_cost, grand_value, missing_quote_count,
                         missing_rate_count)
                     VALUES ($1, $2, $3, TRUE, $4, $5, $6, $7, $8)",
                    &[
                        &run_id,
                        &summary.started_at,
                        &duration_ms,
                        &instrument_count,
                        &stats.grand_cost,
                        &stats.grand_value,
                        &missing_quotes,
                        &missing_rates,
                    ],
                )
            }
            RunOutcome::Failed { kind, message } => client.execute(
                "INSERT INTO aggregation_runs (run_id, started_at, duration_ms, succeeded,
                     failure_kind, message)
                 VALUES ($1, $2, $3, FALSE, $4, $5)",
                &[&run_id, &summary.started_at, &duration_ms, &kind.as_str(), message],
            ),
        };
        inserted.map_err(query_error)?;

        Ok(())
    }
}
