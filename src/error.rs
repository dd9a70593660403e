//! Error types for ges-stats
//!
//! Defines the crate-wide error enum covering configuration, storage, cache
//! and request failures. Uses thiserror for ergonomic error handling.

use crate::cache::CacheError;
use thiserror::Error;

/// Result type alias for ges-stats operations
pub type Result<T> = std::result::Result<T, StatsError>;

/// Comprehensive error type for ges-stats operations
#[derive(Error, Debug)]
pub enum StatsError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage errors that are not raw driver errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Cache layer errors (invalidation and sweeping only; lookups fail open)
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Raw row decoding errors
    #[error("Row error: {0}")]
    Rows(#[from] ges_rollup::Error),

    /// Unknown entity type in a request or command
    #[error("Invalid entity type: {0}")]
    InvalidEntity(String),

    /// Malformed path or query parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A statistics query ran past its deadline
    #[error("Query timed out after {0} seconds")]
    Timeout(u64),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Anyhow errors (for more context)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl StatsError {
    /// Whether the error stems from bad caller input rather than a failure
    /// on our side
    pub fn is_client_error(&self) -> bool {
        matches!(self, StatsError::InvalidEntity(_) | StatsError::InvalidRequest(_))
            || matches!(self, StatsError::Cache(CacheError::InvalidPattern { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = StatsError::InvalidEntity("county".to_string());
        assert_eq!(err.to_string(), "Invalid entity type: county");

        let err = StatsError::Timeout(30);
        assert_eq!(err.to_string(), "Query timed out after 30 seconds");
    }

    #[test]
    fn test_client_error_classification() {
        assert!(StatsError::InvalidEntity("x".into()).is_client_error());
        assert!(StatsError::InvalidRequest("year".into()).is_client_error());
        assert!(!StatsError::Timeout(1).is_client_error());
        assert!(!StatsError::Storage("down".into()).is_client_error());
    }
}
