//! Timeouts and bounded retries around infrastructure calls.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;

/// Retry budget for idempotent infrastructure writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub base_backoff: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_backoff: Duration, timeout: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_backoff,
            timeout,
        }
    }

    /// A single attempt with the given timeout.
    pub fn once(timeout: Duration) -> Self {
        Self::new(1, Duration::ZERO, timeout)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff.saturating_mul(1u32 << attempt.min(16));
        let jitter_ms = self.base_backoff.as_millis() as u64 / 2;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        exp + jitter
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(2))
    }
}

/// Runs `fut`, failing with `StoreError::Timeout` if it takes longer than `limit`.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Runs an idempotent operation, retrying transient failures with jittered
/// exponential backoff until the policy's attempts are used up.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match bounded(policy.timeout, f()).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient infrastructure failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
