//! Retry utilities with exponential backoff.
//!
//! Provides retry logic for transient failures using the `backon` crate.
//! Every call to [`retry_async`] builds a fresh backoff, so attempt counts
//! never carry over from one logical operation to the next.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlrelay::reliability::retry::{retry_async, RetryConfig};
//!
//! let result = retry_async(
//!     &RetryConfig::default(),
//!     "query",
//!     || async { transport.send(&request).await },
//!     |_| true,
//! ).await;
//! ```

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::constants;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub factor: f32,
    /// Randomize delays to spread out retries from many clients.
    pub jitter: bool,
}

/// Three retries after 2s, 4s and 8s.
impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: constants::CLIENT_MAX_RETRIES,
            initial_delay: Duration::from_millis(constants::CLIENT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(constants::CLIENT_MAX_DELAY_SECS),
            factor: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// A config that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Set maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// The delays a full retry sequence would wait, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        self.build_backoff().build()
    }

    /// Build the exponential backoff strategy.
    fn build_backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries as usize)
            .with_factor(self.factor);

        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// # Arguments
///
/// * `config` - Retry configuration
/// * `operation_name` - Name for logging
/// * `operation` - The async operation to retry
/// * `is_retryable` - Predicate to determine if an error is worth retrying
///
/// # Returns
///
/// The result of the operation, or the last error if all retries failed.
pub async fn retry_async<F, Fut, T, E, R>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
    is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let backoff = config.build_backoff();
    let max_retries = config.max_retries;

    let mut attempt = 0u32;
    let notify = |err: &E, dur: Duration| {
        attempt += 1;
        warn!(
            operation = %operation_name,
            attempt = attempt,
            max_retries = max_retries,
            next_delay_ms = dur.as_millis() as u64,
            error = %err,
            "Operation failed, will retry"
        );
    };

    operation
        .retry(backoff)
        .when(move |e| is_retryable(e))
        .notify(notify)
        .await
}

/// Check if an HTTP status code is retryable.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}
