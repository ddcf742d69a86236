//! Error types for the Backstore Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Spec validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Status write rejected because the stored object changed underneath us
    #[error("Conflict updating {0}: resource version is stale")]
    Conflict(String),

    /// Resource no longer exists
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    /// Dependent object exists but was created from a different source
    #[error("Dependent resource conflict: {0}")]
    DependentConflict(String),

    /// Dependent resource client error
    #[error("Dependent resource error: {0}")]
    Dependent(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a dependent resource error
    pub fn dependent(msg: impl Into<String>) -> Self {
        Error::Dependent(msg.into())
    }

    /// Whether retrying the same key can never succeed.
    ///
    /// Terminal errors drop the key from the work queue; everything else is
    /// retried with per-key backoff.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::DependentConflict(_) | Error::NotFound { .. }
        )
    }
}
