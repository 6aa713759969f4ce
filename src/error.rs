//! Error types for the cache layer
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache layer.
///
/// Only [`CacheError::UnknownDataType`] ever escapes the engine's public
/// operations. Every other variant is recovered inside the engine and turned
/// into a miss or a `false` return.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Data type tag has no registered policy
    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    /// Networked backend could not be reached during initialization
    #[error("Backend connection failed: {0}")]
    BackendConnect(String),

    /// A single backend call failed (transport, capacity, invalid input)
    #[error("Backend operation failed: {0}")]
    BackendOperation(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend call exceeded its time budget
    #[error("Backend operation timed out")]
    Timeout,
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CacheError::Timeout
        } else {
            CacheError::BackendOperation(err.to_string())
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CacheError::UnknownDataType("widgets".to_string());
        assert_eq!(err.to_string(), "Unknown data type: widgets");
        assert_eq!(CacheError::Timeout.to_string(), "Backend operation timed out");
    }

    #[test]
    fn test_redis_error_conversion() {
        let reply = redis::RedisError::from((redis::ErrorKind::TypeError, "WRONGTYPE"));
        let err: CacheError = reply.into();
        assert!(matches!(err, CacheError::BackendOperation(_)));
    }

    #[test]
    fn test_serialization_error_conversion() {
        let parse_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: CacheError = parse_err.into();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
