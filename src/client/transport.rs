//! Transports that carry a [`QueryRequest`] to the proxy.

use async_trait::async_trait;
use serde::Deserialize;

use super::error::ClientError;
use crate::constants;
use crate::proxy::{QueryRequest, QueryResult};

/// Sends one request and returns the proxy's answer. No retries.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    /// # Errors
    ///
    /// Returns an error on network failure, a non-success status, or an
    /// undecodable body.
    async fn send(&self, request: &QueryRequest) -> Result<QueryResult, ClientError>;
}

/// Error envelope the proxy returns with non-success statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// JSON over HTTP to the proxy's query endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Creates a transport for the proxy at `base_url` (e.g. `http://127.0.0.1:8080`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Creates a transport that reuses an existing HTTP client.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: endpoint_url(base_url),
        }
    }

    /// Full URL of the query endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn endpoint_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), constants::QUERY_PATH)
}

/// Message from an error body, or the generic fallback.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| constants::MSG_QUERY_FAILED.to_string())
}

#[async_trait]
impl QueryTransport for HttpTransport {
    async fn send(&self, request: &QueryRequest) -> Result<QueryResult, ClientError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}
