//! Bounded retry with exponential backoff for provider calls.
//!
//! The policy is an explicit value rather than a decorator so that callers
//! can see, override, and test it independently of any provider.

use crate::error::{EmbedError, Result};
use std::future::Future;
use std::time::Duration;

/// Retry policy applied around external embedding provider calls.
///
/// Defaults to 3 attempts with exponential backoff starting at 2 seconds and
/// capped at 10 seconds, matching the engine's provider contract.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Backoff delay after the failure of attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Drive `op` until it succeeds or `max_attempts` failures accumulate.
    ///
    /// Once a call is in flight it runs to completion; cancellation does not
    /// propagate below the retry loop. Exhaustion yields
    /// [`EmbedError::RetriesExhausted`] wrapping the final failure.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "embedding provider attempt {}/{} failed ({err}), retrying in {:?}",
                        attempt + 1,
                        self.max_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(EmbedError::RetriesExhausted {
                        attempts: self.max_attempts,
                        source: Box::new(err),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(4),
        )
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(3), Duration::from_secs(10));
        assert_eq!(policy.delay_for(10), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_run_recovers_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = fast_policy(3)
            .run(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(EmbedError::provider("transient"))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_exhausts_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = fast_policy(3)
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(EmbedError::provider("still down")) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(EmbedError::RetriesExhausted { attempts: 3, .. }) => {}
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }
}
