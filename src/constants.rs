//! Shared constants for the proxy, its HTTP surface, and the query client.

use std::time::Duration;

// =============================================================================
// HTTP Server
// =============================================================================

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default HTTP listen address.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Path of the query endpoint.
pub const QUERY_PATH: &str = "/api/query";

/// Path of the health endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Path of the Prometheus metrics endpoint.
pub const METRICS_PATH: &str = "/metrics";

/// How long in-flight requests get to finish after a shutdown signal.
pub const DRAIN_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Database
// =============================================================================

/// PostgreSQL port used when the configuration does not override it.
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Fixed delay between failed connection attempts.
pub const RECONNECT_DELAY_SECS: u64 = 5;

/// Returns the default reconnect delay as a [`Duration`].
#[must_use]
pub const fn reconnect_delay() -> Duration {
    Duration::from_secs(RECONNECT_DELAY_SECS)
}

/// How long closing the connection may wait for in-flight statements
/// before it is torn down.
pub const CLOSE_TIMEOUT_SECS: u64 = 5;

/// Returns the default close timeout as a [`Duration`].
#[must_use]
pub const fn close_timeout() -> Duration {
    Duration::from_secs(CLOSE_TIMEOUT_SECS)
}

// =============================================================================
// Error Messages
// =============================================================================

/// Message returned when a request carries no statement text.
pub const MSG_TEXT_REQUIRED: &str = "Query text is required";

/// Message returned while the database connection is not established.
pub const MSG_NOT_READY: &str = "Database connection not ready";

/// Fallback message when the driver reports a failure without one.
pub const MSG_QUERY_FAILED: &str = "Database query failed";

// =============================================================================
// Query Client
// =============================================================================

/// Maximum number of retries after the initial attempt.
pub const CLIENT_MAX_RETRIES: u32 = 3;

/// Delay before the first retry; doubled for every subsequent retry.
pub const CLIENT_INITIAL_DELAY_MS: u64 = 2000;

/// Upper bound for any single retry delay.
pub const CLIENT_MAX_DELAY_SECS: u64 = 30;

/// Default proxy base URL used by the CLI client commands.
pub const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:8080";
