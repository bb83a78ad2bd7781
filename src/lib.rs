//! sqlrelay: an HTTP query proxy for a single PostgreSQL connection.
//!
//! - [`proxy`] - Connection lifecycle and statement execution
//! - [`http`] - The `/api/query` endpoint and friends
//! - [`client`] - Retrying client for the endpoint
//! - [`config`] - File and environment configuration
//! - [`reliability`] - Backoff helpers shared by the client

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod reliability;

pub use client::{ClientError, QueryClient, RetryPolicy};
pub use config::ProxyConfig;
pub use error::{DriverError, ProxyError};
pub use proxy::{ConnectionStatus, QueryProxy, QueryRequest, QueryResult};
