//! holdagg: holding aggregation engine.
//!
//! Hexagonal architecture: the pure aggregation pipeline lives in [`domain`],
//! port traits in [`ports`], concrete implementations in [`adapters`]. The
//! [`coordinator`] runs read, aggregate and commit under a single-flight guard
//! and the [`scheduler`] drives it periodically.

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod coordinator;
pub mod scheduler;
pub mod cli;
