use std::future::Future;
use std::time::Duration;

use tracing::warn;

use qaforge_core::config::{BackoffStrategy, RetryConfig};
use qaforge_core::error::{QaforgeError, Result};

/// Bounded retry for rate-limited LLM calls.
///
/// Only `QaforgeError::RateLimited` is retried; every other error is
/// returned immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            strategy: config.strategy,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            strategy: BackoffStrategy::Linear,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Wait after the `failures`-th consecutive rate-limited attempt (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let failures = failures.max(1);
        let base = self.initial_backoff.as_millis() as u64;
        let ms = match self.strategy {
            BackoffStrategy::Linear => base.saturating_mul(failures as u64),
            BackoffStrategy::Exponential => {
                let factor = 2u64.saturating_pow(failures - 1);
                base.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms.min(self.max_backoff.as_millis() as u64))
    }

    /// Run `op` until it succeeds, fails with a non-rate-limit error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(QaforgeError::RateLimited(message)) => {
                    if attempt >= max_attempts {
                        return Err(QaforgeError::RateLimitExhausted {
                            attempts: attempt,
                            message,
                        });
                    }
                    let wait = self.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        backoff_ms = wait.as_millis() as u64,
                        error = %message,
                        "Rate limit hit, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
