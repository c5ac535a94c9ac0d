//! Retry policy for idempotent provider reads.
//!
//! Billable submissions never go through here; a failed submission is
//! recorded and left to the caller.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Exponential backoff for idempotent reads such as the credits check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy that tries once.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from `base_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `task_fn` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only errors for which [`crate::RevealError::is_transient`] holds are retried.
    pub async fn run<F, Fut, T>(&self, operation: &str, mut task_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match task_fn().await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < max_attempts && e.is_transient() => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        ?delay,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        error!(operation, attempt, error = %e, "giving up after retries");
                    }
                    return Err(e);
                }
            }
        }
    }
}
