//! Port traits between the domain and its collaborators.

pub mod config_port;
pub mod source_port;
pub mod store_port;
pub mod summary_port;
