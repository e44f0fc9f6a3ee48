// suppliersync/src/sync/retry.rs
use std::future::Future;
use std::time::Duration;

use crate::errors::{Result, SyncError};

/// Bounded-attempt retry policy handed to every external call.
///
/// Each attempt runs under `timeout`. Retryable failures back off
/// exponentially from `base_delay`, capped at `max_delay`; a rate-limit
/// `Retry-After` hint replaces the computed delay (still capped).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(30),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn delay_for(&self, err: &SyncError, attempt: u32) -> Duration {
        match err.retry_after() {
            Some(hint) => hint.min(self.max_delay),
            None => self.backoff(attempt),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Runs a single attempt under the policy timeout.
    pub async fn attempt<T, Fut>(&self, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SyncError::Timeout(self.timeout)),
        }
    }

    /// Sleeps for the delay owed after a failed `attempt`.
    pub async fn pause_after(&self, operation: &str, err: &SyncError, attempt: u32) {
        let delay = self.delay_for(err, attempt);
        tracing::warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retryable error, backing off"
        );
        tokio::time::sleep(delay).await;
    }

    /// Runs `call` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(call()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    self.pause_after(operation, &err, attempt).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::error!(operation, attempts, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}
