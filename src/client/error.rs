//! Errors returned by the query client.

use crate::reliability::is_retryable_status;

/// Failure of one query call, after retries.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request never produced an HTTP response.
    #[error("request to query endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The proxy answered with a non-success status.
    #[error("{message}")]
    Status { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ClientError {
    /// HTTP status of the response, if there was one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether repeating the same request could succeed.
    ///
    /// `400` (missing text) and `500` (the statement itself failed) are
    /// final; unreachable or not-yet-connected proxies are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status != 500 && is_retryable_status(*status),
            Self::Decode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ClientError {
        ClientError::Status {
            status: code,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_status_errors_display_message() {
        assert_eq!(status(503).to_string(), "boom");
        assert_eq!(status(503).status(), Some(503));
    }

    #[test]
    fn test_transient_classification() {
        assert!(status(503).is_transient());
        assert!(status(502).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(500).is_transient());
        assert!(!status(400).is_transient());
        assert!(!ClientError::Decode("eof".to_string()).is_transient());
    }
}
