//! Holding aggregation: join grouped positions with quotes and FX rates,
//! convert into the base currency, derive ratios and rank the result.
//!
//! Every stage is a pure function over borrowed, immutable inputs; the only
//! side effect of a run (persisting the rows) lives behind
//! [`crate::ports::store_port::AggregationStore`].

use serde::Serialize;
use std::cmp::Ordering;

use super::error::HoldaggError;
use super::grouping::{group_holdings, HoldingGroup};
use super::holding::{ensure_finite, normalize_currency, DEFAULT_CASH_PREFIX};
use super::snapshot::{InputSnapshot, QuoteBook, RateTable};

/// Which rows feed the denominators of the share percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharePolicy {
    /// Every row, including those priced without a quote or a rate.
    #[default]
    All,
    /// Only rows that had both a quote and a rate; degraded rows get 0% shares.
    CompleteOnly,
}

impl SharePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "all" => Some(SharePolicy::All),
            "complete_only" | "complete" => Some(SharePolicy::CompleteOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SharePolicy::All => "all",
            SharePolicy::CompleteOnly => "complete_only",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub base_currency: String,
    pub cash_prefix: String,
    pub share_policy: SharePolicy,
}

impl EngineConfig {
    pub fn new(base_currency: &str) -> Self {
        EngineConfig {
            base_currency: normalize_currency(base_currency),
            cash_prefix: DEFAULT_CASH_PREFIX.to_string(),
            share_policy: SharePolicy::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedHolding {
    pub instrument_id: String,
    pub total_quantity: f64,
    pub weighted_avg_cost: f64,
    pub total_cost_original: f64,
    pub current_price: f64,
    pub cost_in_base: f64,
    pub value_in_base: f64,
    pub pl_ratio_pct: f64,
    pub cost_share_pct: f64,
    pub value_share_pct: f64,
    pub account_count: usize,
    pub original_currency: String,
    pub quote_missing: bool,
    pub rate_missing: bool,
}

impl AggregatedHolding {
    pub fn is_degraded(&self) -> bool {
        self.quote_missing || self.rate_missing
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Stats {
    pub instrument_count: usize,
    pub total_quantity_sum: f64,
    pub grand_cost: f64,
    pub grand_value: f64,
    pub avg_pl_ratio_pct: f64,
    pub missing_quote_count: usize,
    pub missing_rate_count: usize,
    pub excluded_cash_count: usize,
}

impl Stats {
    pub fn compute(rows: &[AggregatedHolding], excluded_cash_count: usize) -> Self {
        let instrument_count = rows.len();
        let avg_pl_ratio_pct = if instrument_count > 0 {
            rows.iter().map(|r| r.pl_ratio_pct).sum::<f64>() / instrument_count as f64
        } else {
            0.0
        };

        Stats {
            instrument_count,
            total_quantity_sum: rows.iter().map(|r| r.total_quantity).sum(),
            grand_cost: rows.iter().map(|r| r.cost_in_base).sum(),
            grand_value: rows.iter().map(|r| r.value_in_base).sum(),
            avg_pl_ratio_pct,
            missing_quote_count: rows.iter().filter(|r| r.quote_missing).count(),
            missing_rate_count: rows.iter().filter(|r| r.rate_missing).count(),
            excluded_cash_count,
        }
    }
}

/// Ordered rows plus run statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub holdings: Vec<AggregatedHolding>,
    pub stats: Stats,
}

/// Run the full pipeline: group, join quotes and rates, convert, derive
/// ratios, then order.
///
/// Missing quotes and rates degrade the affected rows and are counted in
/// [`Stats`]; invalid numbers anywhere in the snapshot abort the whole run,
/// as do finite inputs whose sums or products overflow.
pub fn aggregate(
    snapshot: &InputSnapshot,
    config: &EngineConfig,
) -> Result<Aggregation, HoldaggError> {
    let grouping = group_holdings(&snapshot.holdings, &config.cash_prefix)?;
    let quotes = QuoteBook::build(&snapshot.quotes)?;
    let rates = RateTable::build(&snapshot.rates, &config.base_currency)?;

    let mut rows = Vec::with_capacity(grouping.groups.len());
    for group in &grouping.groups {
        let row = convert_group(group, &quotes, &rates);
        check_converted(&row)?;
        rows.push(row);
    }

    let totals = ShareTotals::compute(&rows, config.share_policy);
    ensure_finite(totals.cost, "grand cost", || "share totals".to_string())?;
    ensure_finite(totals.value, "grand value", || "share totals".to_string())?;
    derive_ratios(&mut rows, &totals, config.share_policy);
    for row in &rows {
        let record = || format!("instrument {}", row.instrument_id);
        ensure_finite(row.pl_ratio_pct, "pl ratio", record)?;
        ensure_finite(row.cost_share_pct, "cost share", record)?;
        ensure_finite(row.value_share_pct, "value share", record)?;
    }
    rank(&mut rows);

    let stats = Stats::compute(&rows, grouping.excluded_cash_count);
    Ok(Aggregation {
        holdings: rows,
        stats,
    })
}

/// Join one group with its quote and rate and convert it into the base
/// currency. Ratio fields are left at zero.
pub fn convert_group(group: &HoldingGroup, quotes: &QuoteBook, rates: &RateTable) -> AggregatedHolding {
    let price = quotes.price_for(&group.instrument_id);
    let factor = rates.factor_for(&group.currency);

    let current_price = price.unwrap_or(0.0);
    let rate = factor.unwrap_or(1.0);

    AggregatedHolding {
        instrument_id: group.instrument_id.clone(),
        total_quantity: group.total_quantity,
        weighted_avg_cost: group.weighted_avg_cost(),
        total_cost_original: group.total_cost_original,
        current_price,
        cost_in_base: group.total_cost_original * rate,
        value_in_base: group.total_quantity * current_price * rate,
        pl_ratio_pct: 0.0,
        cost_share_pct: 0.0,
        value_share_pct: 0.0,
        account_count: group.account_count(),
        original_currency: group.currency.clone(),
        quote_missing: price.is_none(),
        rate_missing: factor.is_none(),
    }
}

fn check_converted(row: &AggregatedHolding) -> Result<(), HoldaggError> {
    let record = || format!("instrument {}", row.instrument_id);
    ensure_finite(row.total_quantity, "total quantity", record)?;
    ensure_finite(row.total_cost_original, "total cost", record)?;
    ensure_finite(row.cost_in_base, "cost in base", record)?;
    ensure_finite(row.value_in_base, "value in base", record)
}

/// Denominators for the share percentages.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShareTotals {
    pub cost: f64,
    pub value: f64,
}

impl ShareTotals {
    pub fn compute(rows: &[AggregatedHolding], policy: SharePolicy) -> Self {
        rows.iter()
            .filter(|r| counts_toward_shares(r, policy))
            .fold(ShareTotals::default(), |acc, r| ShareTotals {
                cost: acc.cost + r.cost_in_base,
                value: acc.value + r.value_in_base,
            })
    }
}

fn counts_toward_shares(row: &AggregatedHolding, policy: SharePolicy) -> bool {
    match policy {
        SharePolicy::All => true,
        SharePolicy::CompleteOnly => !row.is_degraded(),
    }
}

pub fn derive_ratios(rows: &mut [AggregatedHolding], totals: &ShareTotals, policy: SharePolicy) {
    for row in rows.iter_mut() {
        row.pl_ratio_pct = pl_ratio_pct(row.cost_in_base, row.value_in_base);
        if counts_toward_shares(row, policy) {
            row.cost_share_pct = share_pct(row.cost_in_base, totals.cost);
            row.value_share_pct = share_pct(row.value_in_base, totals.value);
        } else {
            row.cost_share_pct = 0.0;
            row.value_share_pct = 0.0;
        }
    }
}

pub fn pl_ratio_pct(cost: f64, value: f64) -> f64 {
    if cost > 0.0 {
        (value - cost) / cost * 100.0
    } else {
        0.0
    }
}

pub fn share_pct(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total * 100.0
    } else {
        0.0
    }
}

/// Value descending, instrument id ascending on ties.
pub fn rank(rows: &mut [AggregatedHolding]) {
    rows.sort_by(compare_rank);
}

fn compare_rank(a: &AggregatedHolding, b: &AggregatedHolding) -> Ordering {
    rank_key(b.value_in_base)
        .total_cmp(&rank_key(a.value_in_base))
        .then_with(|| a.instrument_id.cmp(&b.instrument_id))
}

/// `-0.0` (an unquoted short) ties with `0.0`.
fn rank_key(value: f64) -> f64 {
    if value == 0.0 { 0.0 } else { value }
}
