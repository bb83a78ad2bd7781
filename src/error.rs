//! Error types for the query proxy.
//!
//! [`ProxyError`] is what the proxy reports across its boundary; the HTTP
//! layer turns every variant into a structured response. [`DriverError`] is
//! what database drivers report back to the proxy.

use crate::constants;

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Failures reported by the query proxy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ProxyError {
    /// The request carried no statement text.
    #[error("{}", constants::MSG_TEXT_REQUIRED)]
    BadRequest,

    /// The database connection is not established yet.
    #[error("{}", constants::MSG_NOT_READY)]
    ServiceUnavailable,

    /// The driver failed to execute the statement.
    #[error("{0}")]
    QueryFailed(String),

    /// A connection attempt failed. Never surfaced to callers.
    #[error("database connection failed: {0}")]
    ConnectFailed(String),
}

impl ProxyError {
    /// Create a query failure, substituting the generic message for an empty one.
    pub fn query_failed(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            Self::QueryFailed(constants::MSG_QUERY_FAILED.to_string())
        } else {
            Self::QueryFailed(message)
        }
    }

    /// Short label used for metrics and log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::ServiceUnavailable => "unavailable",
            Self::QueryFailed(_) => "query_failed",
            Self::ConnectFailed(_) => "connect_failed",
        }
    }
}

/// Error reported by a database driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    /// Human readable driver message, possibly empty.
    pub message: String,
    /// The driver considers the underlying connection unusable.
    pub connection_lost: bool,
}

impl DriverError {
    /// A statement-level failure; the connection stays usable.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            connection_lost: false,
        }
    }

    /// A failure that left the connection closed.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            connection_lost: true,
        }
    }
}

impl From<DriverError> for ProxyError {
    fn from(err: DriverError) -> Self {
        Self::query_failed(err.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_failed_keeps_driver_message() {
        let err = ProxyError::query_failed("relation \"users\" does not exist");
        assert_eq!(err.to_string(), "relation \"users\" does not exist");
    }

    #[test]
    fn test_query_failed_falls_back_on_empty_message() {
        assert_eq!(
            ProxyError::query_failed("").to_string(),
            constants::MSG_QUERY_FAILED
        );
        assert_eq!(
            ProxyError::query_failed("   ").to_string(),
            constants::MSG_QUERY_FAILED
        );
    }

    #[test]
    fn test_fixed_messages() {
        assert_eq!(ProxyError::BadRequest.to_string(), "Query text is required");
        assert_eq!(
            ProxyError::ServiceUnavailable.to_string(),
            "Database connection not ready"
        );
    }

    #[test]
    fn test_driver_error_conversion() {
        let err: ProxyError = DriverError::connection_lost("connection closed").into();
        assert_eq!(err, ProxyError::QueryFailed("connection closed".to_string()));
        assert_eq!(err.kind(), "query_failed");
    }
}
