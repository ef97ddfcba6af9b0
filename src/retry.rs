//! Bounded retry with a constant interval.
//!
//! DNS lookups and connect probes during bootstrap retry on a fixed cadence
//! with no jitter or growth: the peers being waited on are containers that
//! come up once, and a predictable worst-case (`attempts × interval`) is
//! what the orchestrator's deadlines are budgeted against.

use crate::error::{CorralError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry budget: at most `attempts` tries, `interval` apart.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least 1).
    pub attempts: u32,
    /// Constant interval between attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a new policy.
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// budget is exhausted. The last error is returned on exhaustion.
    pub async fn run<F, Fut, T>(&self, what: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        what,
                        attempt,
                        max_attempts = self.attempts,
                        error = %e,
                        "attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < self.attempts {
                        sleep(self.interval).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| CorralError::Internal(format!("{}: empty retry budget", what))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_attempt_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<u32> = policy
            .run("test", || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<u32> = policy
            .run("test", || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                        Err(CorralError::Timeout(5))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let result: Result<()> = policy
            .run("test", || async { Err(CorralError::Timeout(5)) })
            .await;
        assert!(matches!(result, Err(CorralError::Timeout(5))));
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = policy
            .run("test", || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Err(CorralError::Bootstrap("fatal".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
