//! Grouping stage: collapse per-account ledger rows into one group per instrument.

use std::collections::{BTreeMap, BTreeSet};

use super::error::HoldaggError;
use super::holding::{is_cash_instrument, HoldingRecord};

/// A summed quantity is flat when it is this small relative to the gross
/// quantity (sum of absolute row quantities) that produced it.
pub const FLAT_QUANTITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct HoldingGroup {
    pub instrument_id: String,
    pub currency: String,
    pub total_quantity: f64,
    pub total_cost_original: f64,
    /// Sum of absolute row quantities.
    pub gross_quantity: f64,
    pub accounts: BTreeSet<String>,
}

impl HoldingGroup {
    fn new(instrument_id: &str, currency: &str) -> Self {
        HoldingGroup {
            instrument_id: instrument_id.to_string(),
            currency: currency.to_string(),
            total_quantity: 0.0,
            total_cost_original: 0.0,
            gross_quantity: 0.0,
            accounts: BTreeSet::new(),
        }
    }

    /// Zero for a flat position. Offsetting rows that cancel up to rounding
    /// count as flat; a genuinely tiny position keeps its average cost.
    pub fn weighted_avg_cost(&self) -> f64 {
        if self.total_quantity.abs() <= FLAT_QUANTITY_EPSILON * self.gross_quantity {
            0.0
        } else {
            self.total_cost_original / self.total_quantity
        }
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grouping {
    /// Ordered by instrument id.
    pub groups: Vec<HoldingGroup>,
    pub excluded_cash_count: usize,
}

/// Validate every ledger row and partition the non-cash rows by
/// `(instrument_id, currency)`.
///
/// An instrument may only appear under one currency; a second currency for
/// the same instrument is rejected so that instrument ids stay unique in the
/// output.
pub fn group_holdings(
    holdings: &[HoldingRecord],
    cash_prefix: &str,
) -> Result<Grouping, HoldaggError> {
    let mut by_instrument: BTreeMap<&str, HoldingGroup> = BTreeMap::new();
    // account that fixed each instrument's currency
    let mut first_account: BTreeMap<&str, &str> = BTreeMap::new();
    let mut excluded_cash_count = 0;

    for record in holdings {
        if is_cash_instrument(&record.instrument_id, cash_prefix) {
            excluded_cash_count += 1;
            continue;
        }
        record.validate()?;

        let group = by_instrument
            .entry(record.instrument_id.as_str())
            .or_insert_with(|| HoldingGroup::new(&record.instrument_id, &record.currency));
        let first = *first_account
            .entry(record.instrument_id.as_str())
            .or_insert(record.account_id.as_str());

        if group.currency != record.currency {
            return Err(HoldaggError::data_integrity(
                format!(
                    "holding {} in accounts {} and {}",
                    record.instrument_id, first, record.account_id
                ),
                format!(
                    "instrument {} is held in both {} and {}",
                    record.instrument_id, group.currency, record.currency
                ),
            ));
        }

        group.total_quantity += record.quantity;
        group.gross_quantity += record.quantity.abs();
        group.total_cost_original += record.quantity * record.cost_per_unit;
        group.accounts.insert(record.account_id.clone());
    }

    Ok(Grouping {
        groups: by_instrument.into_values().collect(),
        excluded_cash_count,
    })
}
