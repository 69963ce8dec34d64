//! Error types for the conflation core.

use thiserror::Error;

/// Result type alias for conflation operations.
pub type Result<T> = std::result::Result<T, ConflationError>;

/// Errors surfaced by stores, statistics and the manager.
///
/// Malformed rows are not errors: they are dropped and counted as failed
/// updates. Memory pressure is handled by eviction.
#[derive(Error, Debug)]
pub enum ConflationError {
    /// A configuration value was rejected; the previous config stays in effect
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// The store has been destroyed and no longer accepts work
    #[error("store {0} has been destroyed")]
    StoreDestroyed(String),

    /// No store is registered for the feed id
    #[error("no store registered for feed {0}")]
    StoreNotFound(String),

    /// JSON encoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConflationError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConflationError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}
