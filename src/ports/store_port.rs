//! Aggregation store port.

use crate::domain::aggregation::AggregatedHolding;
use crate::domain::error::HoldaggError;

pub trait AggregationStore {
    /// Atomically replace every stored row with `rows`.
    ///
    /// Implementations delete and insert inside one transaction; on any
    /// failure the previous rows stay in place and `HoldaggError::Commit` is
    /// returned.
    fn replace_all(&self, rows: &[AggregatedHolding]) -> Result<(), HoldaggError>;

    /// The last committed rows in rank order.
    fn load_all(&self) -> Result<Vec<AggregatedHolding>, HoldaggError>;
}
