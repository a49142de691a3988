//! Domain error types.

/// Top-level error type for holdagg.
///
/// `Clone` so that triggers coalesced onto a single follow-up run can all
/// receive that run's result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HoldaggError {
    #[error("{input} unavailable: {reason}")]
    InputUnavailable { input: String, reason: String },

    #[error("invalid record ({record}): {reason}")]
    DataIntegrity { record: String, reason: String },

    #[error("commit failed, previous snapshot kept: {reason}")]
    Commit { reason: String },

    #[error("an aggregation run is already in progress")]
    AlreadyRunning,

    #[error("aggregation run cancelled before commit")]
    Cancelled,

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("file error for {path}: {reason}")]
    Export { path: String, reason: String },
}

impl HoldaggError {
    pub fn input_unavailable(input: &str, reason: impl Into<String>) -> Self {
        HoldaggError::InputUnavailable {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub fn data_integrity(record: impl Into<String>, reason: impl Into<String>) -> Self {
        HoldaggError::DataIntegrity {
            record: record.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is a control signal rather than a fault.
    pub fn is_control_signal(&self) -> bool {
        matches!(self, HoldaggError::AlreadyRunning | HoldaggError::Cancelled)
    }
}

impl From<&HoldaggError> for std::process::ExitCode {
    fn from(err: &HoldaggError) -> Self {
        let code: u8 = match err {
            HoldaggError::Export { .. } => 1,
            HoldaggError::ConfigParse { .. }
            | HoldaggError::ConfigMissing { .. }
            | HoldaggError::ConfigInvalid { .. } => 2,
            HoldaggError::Database { .. }
            | HoldaggError::DatabaseQuery { .. }
            | HoldaggError::Commit { .. } => 3,
            HoldaggError::InputUnavailable { .. } => 4,
            HoldaggError::DataIntegrity { .. } => 5,
            HoldaggError::AlreadyRunning | HoldaggError::Cancelled => 6,
        };
        std::process::ExitCode::from(code)
    }
}
