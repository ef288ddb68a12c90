//! Bounded retry policy for retryable failures

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{ClientError, Result};

/// Fixed attempt cap applied only to retryable errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Up to `max_attempts` attempts, one second apart
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Duration::from_secs(1),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another
    pub fn allows_retry(&self, attempt: u32, err: &ClientError) -> bool {
        err.is_retryable() && attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// The last error is surfaced unchanged.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if self.allows_retry(attempt, &err) => {
                    warn!(
                        "attempt {}/{} failed, retrying: {}",
                        attempt, self.max_attempts, err
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
