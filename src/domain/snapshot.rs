//! Point-in-time input snapshot and the lookup tables built from it.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::error::HoldaggError;
use super::holding::{normalize_currency, ExchangeRateRecord, HoldingRecord, QuoteRecord};

/// The three inputs of one run, captured once and never re-read mid-run.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSnapshot {
    pub holdings: Vec<HoldingRecord>,
    pub quotes: Vec<QuoteRecord>,
    pub rates: Vec<ExchangeRateRecord>,
    pub captured_at: DateTime<Utc>,
}

impl InputSnapshot {
    pub fn new(
        holdings: Vec<HoldingRecord>,
        quotes: Vec<QuoteRecord>,
        rates: Vec<ExchangeRateRecord>,
    ) -> Self {
        InputSnapshot {
            holdings,
            quotes,
            rates,
            captured_at: Utc::now(),
        }
    }
}

/// Latest price per instrument.
#[derive(Debug, Clone, Default)]
pub struct QuoteBook {
    prices: HashMap<String, f64>,
}

impl QuoteBook {
    /// Later records for the same instrument replace earlier ones.
    pub fn build(quotes: &[QuoteRecord]) -> Result<Self, HoldaggError> {
        let mut prices = HashMap::with_capacity(quotes.len());
        for quote in quotes {
            quote.validate()?;
            prices.insert(quote.instrument_id.clone(), quote.price);
        }
        Ok(QuoteBook { prices })
    }

    pub fn price_for(&self, instrument_id: &str) -> Option<f64> {
        self.prices.get(instrument_id).copied()
    }
}

/// Conversion factors into a single base currency.
#[derive(Debug, Clone)]
pub struct RateTable {
    base_currency: String,
    factors: HashMap<String, f64>,
}

impl RateTable {
    /// Rates that do not target `base_currency` are ignored without validation.
    pub fn build(rates: &[ExchangeRateRecord], base_currency: &str) -> Result<Self, HoldaggError> {
        let base_currency = normalize_currency(base_currency);
        let mut factors = HashMap::new();
        for rate in rates {
            if normalize_currency(&rate.to_currency) != base_currency {
                continue;
            }
            rate.validate()?;
            factors.insert(normalize_currency(&rate.from_currency), rate.rate);
        }
        Ok(RateTable {
            base_currency,
            factors,
        })
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    /// Factor converting one unit of `currency` into the base currency.
    /// The base currency converts to itself at 1 even without a record.
    pub fn factor_for(&self, currency: &str) -> Option<f64> {
        let currency = normalize_currency(currency);
        if currency == self.base_currency {
            return Some(1.0);
        }
        self.factors.get(&currency).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_book_last_record_wins() {
        let quotes = vec![
            QuoteRecord::new("AAPL", 180.0, "USD"),
            QuoteRecord::new("MSFT", 400.0, "USD"),
            QuoteRecord::new("AAPL", 185.0, "USD"),
        ];
        let book = QuoteBook::build(&quotes).unwrap();
        assert_eq!(book.price_for("AAPL"), Some(185.0));
        assert_eq!(book.price_for("MSFT"), Some(400.0));
        assert_eq!(book.price_for("GOOG"), None);
    }

    #[test]
    fn quote_book_rejects_nan() {
        let quotes = vec![QuoteRecord::new("AAPL", f64::NAN, "USD")];
        assert!(matches!(
            QuoteBook::build(&quotes),
            Err(HoldaggError::DataIntegrity { .. })
        ));
    }

    #[test]
    fn rate_table_ignores_other_targets() {
        let rates = vec![
            ExchangeRateRecord::new("EUR", "USD", 1.1),
            ExchangeRateRecord::new("EUR", "GBP", f64::NAN),
            ExchangeRateRecord::new("JPY", "usd", 0.0067),
        ];
        let table = RateTable::build(&rates, "usd").unwrap();
        assert_eq!(table.base_currency(), "USD");
        assert_eq!(table.factor_for("EUR"), Some(1.1));
        assert_eq!(table.factor_for("jpy"), Some(0.0067));
        assert_eq!(table.factor_for("GBP"), None);
    }

    #[test]
    fn rate_table_base_currency_is_identity() {
        let table = RateTable::build(&[], "USD").unwrap();
        assert_eq!(table.factor_for("USD"), Some(1.0));
        assert_eq!(table.factor_for("EUR"), None);
    }

    #[test]
    fn rate_table_rejects_zero_rate_to_base() {
        let rates = vec![ExchangeRateRecord::new("EUR", "USD", 0.0)];
        match RateTable::build(&rates, "USD") {
            Err(HoldaggError::DataIntegrity { record, .. }) => assert_eq!(record, "rate EUR->USD"),
            other => panic!("expected DataIntegrity, got {other:?}"),
        }
    }
}
