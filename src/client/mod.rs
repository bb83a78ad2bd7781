//! Retrying client for the query proxy.
//!
//! [`QueryClient`] is what consumers call instead of talking to the proxy
//! directly. Failed calls are retried with exponential backoff: three
//! retries after 2s, 4s and 8s by default. The retry budget belongs to a
//! single call; independent calls on the same client never share it.
//!
//! # Example
//!
//! ```ignore
//! use sqlrelay::client::QueryClient;
//!
//! let client = QueryClient::new("http://127.0.0.1:8080")?;
//! let result = client
//!     .query("SELECT * FROM events WHERE id = $1", Some(vec![json!(7)]))
//!     .await?;
//! println!("{} rows", result.row_count);
//! ```

mod error;
mod transport;

pub use error::ClientError;
pub use transport::{HttpTransport, QueryTransport};

use serde_json::Value;
use tracing::{debug, error, info};

use crate::proxy::{QueryRequest, QueryResult};
use crate::reliability::{RetryConfig, retry_async};

/// Which failures are worth another attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry every failure, including `400` and `500` responses.
    #[default]
    Always,
    /// Retry only failures that [`ClientError::is_transient`] accepts.
    TransientOnly,
}

impl RetryPolicy {
    fn should_retry(self, err: &ClientError) -> bool {
        match self {
            Self::Always => true,
            Self::TransientOnly => err.is_transient(),
        }
    }
}

/// Query interface with bounded retry.
#[derive(Debug, Clone)]
pub struct QueryClient<T = HttpTransport> {
    transport: T,
    retry: RetryConfig,
    policy: RetryPolicy,
}

impl QueryClient<HttpTransport> {
    /// Creates a client for the proxy at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self::with_transport(HttpTransport::new(base_url)?))
    }
}

impl<T: QueryTransport> QueryClient<T> {
    /// Creates a client over any transport, with the default retry settings.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            retry: RetryConfig::default(),
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry settings.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Executes `text` with optional bind values.
    ///
    /// # Errors
    ///
    /// Returns the last error once the retry budget is spent, or the first
    /// error the policy declines to retry.
    pub async fn query(
        &self,
        text: &str,
        params: Option<Vec<Value>>,
    ) -> Result<QueryResult, ClientError> {
        let request = QueryRequest {
            text: Some(text.to_string()),
            params,
        };
        self.send(&request).await
    }

    /// Sends a prepared request, retrying identical copies on failure.
    ///
    /// # Errors
    ///
    /// See [`query`](Self::query).
    pub async fn send(&self, request: &QueryRequest) -> Result<QueryResult, ClientError> {
        let policy = self.policy;
        let transport = &self.transport;

        retry_async(
            &self.retry,
            "query",
            move || async move {
                info!(text = ?request.text, params = ?request.params, "Executing query");
                match transport.send(request).await {
                    Ok(result) => {
                        info!(row_count = result.row_count, "Query result received");
                        debug!(rows = ?result.rows, fields = ?result.fields, "Query result");
                        Ok(result)
                    },
                    Err(e) => {
                        error!(error = %e, "API query error");
                        Err(e)
                    },
                }
            },
            move |e| policy.should_retry(e),
        )
        .await
    }

    /// Checks that the proxy can reach its database by running `SELECT 1`.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.query("SELECT 1", None).await.map(|_| ())
    }
}
