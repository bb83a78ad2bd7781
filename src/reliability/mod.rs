//! Reliability primitives.

pub mod retry;

pub use retry::{RetryConfig, is_retryable_status, retry_async};
