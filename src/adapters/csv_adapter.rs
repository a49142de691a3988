//! CSV file adapter: source ports backed by CSV files, and CSV export of an
//! aggregation result.

use crate::domain::aggregation::AggregatedHolding;
use crate::domain::error::HoldaggError;
use crate::domain::holding::{normalize_currency, ExchangeRateRecord, HoldingRecord, QuoteRecord};
use crate::ports::source_port::{LedgerPort, QuotePort, RatePort};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct HoldingRow {
    instrument_id: String,
    account_id: String,
    quantity: String,
    cost_per_unit: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct QuoteRow {
    instrument_id: String,
    price: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct RateRow {
    from_currency: String,
    to_currency: String,
    rate: String,
}

/// Source ports reading one CSV file each. Files are re-read on every fetch.
pub struct CsvAdapter {
    holdings_path: PathBuf,
    quotes_path: PathBuf,
    rates_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(holdings_path: PathBuf, quotes_path: PathBuf, rates_path: PathBuf) -> Self {
        Self {
            holdings_path,
            quotes_path,
            rates_path,
        }
    }

    /// Expects `holdings.csv`, `quotes.csv` and `rates.csv` under `dir`.
    pub fn from_dir(dir: &Path) -> Self {
        Self::new(
            dir.join("holdings.csv"),
            dir.join("quotes.csv"),
            dir.join("rates.csv"),
        )
    }
}

fn parse_number(
    value: &str,
    field: &str,
    record: impl Fn() -> String,
) -> Result<f64, HoldaggError> {
    value.trim().parse::<f64>().map_err(|_| {
        HoldaggError::data_integrity(record(), format!("{field} is not numeric: {value:?}"))
    })
}

/// Deserialize every row, pairing each with its 1-based file line.
fn parse_rows<T: for<'de> Deserialize<'de>>(
    path: &Path,
    input: &str,
) -> Result<Vec<(usize, T)>, HoldaggError> {
    let content = fs::read_to_string(path).map_err(|e| {
        HoldaggError::input_unavailable(input, format!("failed to read {}: {}", path.display(), e))
    })?;

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize::<T>().enumerate() {
        // header is line 1
        let line = i + 2;
        let row = result.map_err(|e| {
            HoldaggError::data_integrity(
                format!("{} line {}", path.display(), line),
                format!("CSV parse error: {e}"),
            )
        })?;
        rows.push((line, row));
    }
    Ok(rows)
}

pub fn read_holdings(path: &Path) -> Result<Vec<HoldingRecord>, HoldaggError> {
    parse_rows::<HoldingRow>(path, "ledger")?
        .into_iter()
        .map(|(line, row)| {
            let record = || {
                format!(
                    "holding {} in account {} ({} line {})",
                    row.instrument_id,
                    row.account_id,
                    path.display(),
                    line
                )
            };
            Ok(HoldingRecord {
                quantity: parse_number(&row.quantity, "quantity", record)?,
                cost_per_unit: parse_number(&row.cost_per_unit, "cost_per_unit", record)?,
                currency: normalize_currency(&row.currency),
                instrument_id: row.instrument_id,
                account_id: row.account_id,
            })
        })
        .collect()
}

pub fn read_quotes(path: &Path) -> Result<Vec<QuoteRecord>, HoldaggError> {
    parse_rows::<QuoteRow>(path, "quotes")?
        .into_iter()
        .map(|(line, row)| {
            let record =
                || format!("quote for {} ({} line {})", row.instrument_id, path.display(), line);
            Ok(QuoteRecord {
                price: parse_number(&row.price, "price", record)?,
                currency: normalize_currency(&row.currency),
                instrument_id: row.instrument_id,
            })
        })
        .collect()
}

pub fn read_rates(path: &Path) -> Result<Vec<ExchangeRateRecord>, HoldaggError> {
    parse_rows::<RateRow>(path, "rates")?
        .into_iter()
        .map(|(line, row)| {
            let record = || {
                format!(
                    "rate {}->{} ({} line {})",
                    row.from_currency,
                    row.to_currency,
                    path.display(),
                    line
                )
            };
            Ok(ExchangeRateRecord {
                rate: parse_number(&row.rate, "rate", record)?,
                from_currency: normalize_currency(&row.from_currency),
                to_currency: normalize_currency(&row.to_currency),
            })
        })
        .collect()
}

/// Write rows in the given order with a header line.
pub fn write_aggregation(path: &Path, rows: &[AggregatedHolding]) -> Result<(), HoldaggError> {
    let export_error = |e: &dyn std::fmt::Display| HoldaggError::Export {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let mut wtr = csv::Writer::from_path(path).map_err(|e| export_error(&e))?;
    for row in rows {
        wtr.serialize(row).map_err(|e| export_error(&e))?;
    }
    wtr.flush().map_err(|e| export_error(&e))?;
    Ok(())
}

impl LedgerPort for CsvAdapter {
    fn fetch_holdings(&self) -> Result<Vec<HoldingRecord>, HoldaggError> {
        read_holdings(&self.holdings_path)
    }
}

impl QuotePort for CsvAdapter {
    fn fetch_latest_quotes(&self) -> Result<Vec<QuoteRecord>, HoldaggError> {
        read_quotes(&self.quotes_path)
    }
}

impl RatePort for CsvAdapter {
    fn fetch_rates(&self, base_currency: &str) -> Result<Vec<ExchangeRateRecord>, HoldaggError> {
        let base = normalize_currency(base_currency);
        Ok(read_rates(&self.rates_path)?
            .into_iter()
            .filter(|r| r.to_currency == base)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        write!(f, "{}", content).unwrap();
        path
    }

    #[test]
    fn reads_holdings() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "holdings.csv",
            "instrument_id,account_id,quantity,cost_per_unit,currency\n\
             AAPL,acct-1,10,150.5,usd\n\
             MSFT, acct-2 ,-5,300,USD\n",
        );

        let holdings = read_holdings(&path).unwrap();
        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0], HoldingRecord::new("AAPL", "acct-1", 10.0, 150.5, "USD"));
        assert_eq!(holdings[1].account_id, "acct-2");
        assert_eq!(holdings[1].quantity, -5.0);
    }

    #[test]
    fn non_numeric_quantity_names_the_line() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "holdings.csv",
            "instrument_id,account_id,quantity,cost_per_unit,currency\n\
             AAPL,acct-1,10,150,USD\n\
             MSFT,acct-2,lots,300,USD\n",
        );

        match read_holdings(&path) {
            Err(HoldaggError::DataIntegrity { record, reason }) => {
                assert!(record.starts_with("holding MSFT in account acct-2"));
                assert!(record.ends_with("line 3)"));
                assert!(reason.contains("quantity"));
            }
            other => panic!("expected DataIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_input_unavailable() {
        let adapter = CsvAdapter::from_dir(Path::new("/nonexistent/holdagg"));
        match adapter.fetch_holdings() {
            Err(HoldaggError::InputUnavailable { input, .. }) => assert_eq!(input, "ledger"),
            other => panic!("expected InputUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn missing_column_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "quotes.csv", "instrument_id,price\nAAPL,180\n");
        assert!(matches!(
            read_quotes(&path),
            Err(HoldaggError::DataIntegrity { .. })
        ));
    }

    #[test]
    fn rates_are_filtered_to_base() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir,
            "rates.csv",
            "from_currency,to_currency,rate\nEUR,USD,1.1\nEUR,GBP,0.85\nJPY,usd,0.0067\n",
        );
        let adapter = CsvAdapter::from_dir(dir.path());
        let rates = adapter.fetch_rates("USD").unwrap();
        assert_eq!(rates.len(), 2);
        assert!(rates.iter().all(|r| r.to_currency == "USD"));
    }

    #[test]
    fn writes_aggregation_with_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let row = AggregatedHolding {
            instrument_id: "X".into(),
            total_quantity: 150.0,
            weighted_avg_cost: 1600.0 / 150.0,
            total_cost_original: 1600.0,
            current_price: 15.0,
            cost_in_base: 1600.0,
            value_in_base: 2250.0,
            pl_ratio_pct: 40.625,
            cost_share_pct: 100.0,
            value_share_pct: 100.0,
            account_count: 2,
            original_currency: "USD".into(),
            quote_missing: false,
            rate_missing: false,
        };
        write_aggregation(&path, &[row]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("instrument_id,total_quantity,weighted_avg_cost"));
        assert!(header.ends_with("quote_missing,rate_missing"));
        let first = lines.next().unwrap();
        assert!(first.starts_with("X,150.0,"));
        assert!(first.contains(",40.625,"));
    }
}
