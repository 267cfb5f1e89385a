//! Error types for the evidence cache
//!
//! Covers:
//! - Persistence backend failures (store operations)
//! - Encoding/decoding of cache payloads
//! - Strategy parsing

/// Errors during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Backend could not complete the operation
    #[error("cache backend error: {0}")]
    Backend(String),

    /// SQLite error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Payload could not be encoded or decoded
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Payload decoded but violates the cache data contract
    #[error("invalid cache data: {0}")]
    InvalidData(String),

    /// Blocking task panicked or was cancelled
    #[error("cache task failed: {0}")]
    Join(String),
}

impl CacheError {
    /// Create backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Check if error is transient (safe to retry the whole operation)
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(_) | Self::Join(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Join(e.to_string())
    }
}

/// Unknown invalidation strategy name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown invalidation strategy '{0}' (expected \"step\" or \"assertion\")")]
pub struct UnknownStrategy(pub String);

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_error_display() {
        let err = CacheError::backend("connection reset");
        assert_eq!(err.to_string(), "cache backend error: connection reset");
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(CacheError::backend("timeout").is_retryable());
        assert!(!CacheError::InvalidData("no steps".to_string()).is_retryable());
    }

    #[test]
    fn serde_errors_convert() {
        let err: CacheError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
