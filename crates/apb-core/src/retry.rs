use std::{future::Future, time::Duration};

use tokio::time::sleep;

use crate::Result;

/// Bounded retry for transient platform failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    /// Ceiling for any single delay, server hints included.
    pub max_delay: Duration,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_delay: Duration::from_secs(2),
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `failed + 1`, doubling from `base_delay`.
    pub fn backoff(&self, failed: u32) -> Duration {
        let exp = failed.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `call`, retrying transient failures.
    ///
    /// Non-transient errors are returned after the first attempt. A server
    /// wait hint replaces the backoff when it fits under `max_delay`; a longer
    /// hint ends the retry loop.
    pub async fn invoke<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            let err = match call().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            if !err.is_transient() {
                return Err(err);
            }
            if attempt >= max_attempts {
                tracing::warn!(op, attempts = attempt, error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = match err.retry_after() {
                Some(hint) if hint <= self.max_delay => hint,
                Some(hint) => {
                    tracing::warn!(
                        op,
                        retry_after_ms = hint.as_millis() as u64,
                        "platform asked to wait longer than the retry ceiling"
                    );
                    return Err(err);
                }
                None => self.backoff(attempt),
            };
            tracing::debug!(
                op,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying transient failure"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
