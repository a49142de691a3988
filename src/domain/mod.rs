//! Core domain types and the pure aggregation pipeline.

pub mod holding;
pub mod snapshot;
pub mod grouping;
pub mod aggregation;
pub mod schedule;
pub mod run_summary;
pub mod config_validation;
pub mod error;
