//! Retry policy for dispatch.
//!
//! # Design Decisions
//! - Writes are never retried (not idempotent from the router's view)
//! - Connection errors are always retryable for reads
//! - Timeouts only when the caller or config opts in
//! - Everything else surfaces immediately

use crate::config::RoutingConfig;
use crate::error::RouterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_on_timeout: bool,
}

impl RetryPolicy {
    /// Policy for a read; `retry_on_timeout` overrides the configured default.
    pub fn for_read(routing: &RoutingConfig, retry_on_timeout: Option<bool>) -> Self {
        Self {
            max_retries: routing.max_retries,
            retry_on_timeout: retry_on_timeout.unwrap_or(routing.retry_on_timeout),
        }
    }

    pub fn for_write() -> Self {
        Self {
            max_retries: 0,
            retry_on_timeout: false,
        }
    }

    pub fn is_retryable(&self, error: &RouterError) -> bool {
        match error {
            RouterError::Connection { .. } => true,
            RouterError::Timeout { .. } => self.retry_on_timeout,
            _ => false,
        }
    }

    /// Whether the failure of attempt `attempt` (0-based) warrants another try.
    pub fn should_retry(&self, attempt: u32, error: &RouterError) -> bool {
        attempt < self.max_retries && self.is_retryable(error)
    }
}
