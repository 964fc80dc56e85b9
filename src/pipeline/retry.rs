use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::JobError;

/// Bounded retry with capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
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
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.limits.retry_attempts.max(1),
            base_delay: Duration::from_millis(config.limits.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.limits.retry_max_delay_ms),
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1_u32 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently or attempts run out.
    /// Only errors accepted by `retryable` are retried; the last error is returned.
    pub async fn run<T, F, Fut, P>(&self, label: &str, retryable: P, mut operation: F) -> Result<T, JobError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
        P: Fn(&JobError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if attempt < self.max_attempts && retryable(&error) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        ?delay,
                        %error,
                        "Transient failure; retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Retry only errors classified as transient
    pub async fn run_transient<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, JobError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        self.run(label, JobError::is_transient, operation).await
    }
}
