//! Error types for arbor.

use thiserror::Error;

/// Result type alias using arbor's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for arbor operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP-layer failure talking to the remote store.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Insert rejected by a uniqueness constraint on the remote side.
    ///
    /// Expected during reconciliation; it drives the fall back to update.
    /// `message` is the store's description of the violation.
    #[error("Conflict in {table}: {message}")]
    Conflict { table: String, message: String },

    /// A conflict was reported but the conflicting row could not be found.
    #[error("Record inconsistency in {table}: conflict reported for {key} but no row matched")]
    RecordInconsistency { table: String, key: String },

    /// A local payload lacks the fields its identity is derived from.
    #[error("Identity derivation failed: {0}")]
    IdentityDerivation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Short machine-friendly name of the error class, used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Conflict { .. } => "conflict",
            Error::RecordInconsistency { .. } => "record_inconsistency",
            Error::IdentityDerivation(_) => "identity_derivation",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::InvalidInput(_) => "invalid_input",
            Error::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
