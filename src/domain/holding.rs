//! Raw input records read from the ledger, quote and rate sources.

use crate::domain::error::HoldaggError;

/// Default prefix marking cash balances in the ledger, e.g. `$CASH-USD`.
pub const DEFAULT_CASH_PREFIX: &str = "$CASH";

/// One ledger row per (account, instrument).
#[derive(Debug, Clone, PartialEq)]
pub struct HoldingRecord {
    pub instrument_id: String,
    pub account_id: String,
    /// Signed; negative quantities are short positions.
    pub quantity: f64,
    pub cost_per_unit: f64,
    pub currency: String,
}

impl HoldingRecord {
    pub fn new(
        instrument_id: &str,
        account_id: &str,
        quantity: f64,
        cost_per_unit: f64,
        currency: &str,
    ) -> Self {
        HoldingRecord {
            instrument_id: instrument_id.to_string(),
            account_id: account_id.to_string(),
            quantity,
            cost_per_unit,
            currency: normalize_currency(currency),
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "holding {} in account {}",
            self.instrument_id, self.account_id
        )
    }

    pub fn validate(&self) -> Result<(), HoldaggError> {
        ensure_finite(self.quantity, "quantity", || self.describe())?;
        ensure_finite(self.cost_per_unit, "cost_per_unit", || self.describe())?;
        if self.instrument_id.trim().is_empty() {
            return Err(HoldaggError::data_integrity(
                self.describe(),
                "empty instrument id",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRecord {
    pub instrument_id: String,
    pub price: f64,
    pub currency: String,
}

impl QuoteRecord {
    pub fn new(instrument_id: &str, price: f64, currency: &str) -> Self {
        QuoteRecord {
            instrument_id: instrument_id.to_string(),
            price,
            currency: normalize_currency(currency),
        }
    }

    pub fn describe(&self) -> String {
        format!("quote for {}", self.instrument_id)
    }

    pub fn validate(&self) -> Result<(), HoldaggError> {
        ensure_finite(self.price, "price", || self.describe())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRateRecord {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: f64,
}

impl ExchangeRateRecord {
    pub fn new(from_currency: &str, to_currency: &str, rate: f64) -> Self {
        ExchangeRateRecord {
            from_currency: normalize_currency(from_currency),
            to_currency: normalize_currency(to_currency),
            rate,
        }
    }

    pub fn describe(&self) -> String {
        format!("rate {}->{}", self.from_currency, self.to_currency)
    }

    pub fn validate(&self) -> Result<(), HoldaggError> {
        ensure_finite(self.rate, "rate", || self.describe())?;
        if self.rate <= 0.0 {
            return Err(HoldaggError::data_integrity(
                self.describe(),
                format!("rate must be positive, got {}", self.rate),
            ));
        }
        Ok(())
    }
}

/// Trimmed, upper-cased currency code.
pub fn normalize_currency(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub fn is_cash_instrument(instrument_id: &str, cash_prefix: &str) -> bool {
    if cash_prefix.is_empty() {
        return false;
    }
    let id = instrument_id.trim();
    id.len() >= cash_prefix.len()
        && id.as_bytes()[..cash_prefix.len()].eq_ignore_ascii_case(cash_prefix.as_bytes())
}

pub(crate) fn ensure_finite(
    value: f64,
    field: &str,
    record: impl FnOnce() -> String,
) -> Result<(), HoldaggError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(HoldaggError::data_integrity(
            record(),
            format!("{field} is not a finite number ({value})"),
        ))
    }
}
