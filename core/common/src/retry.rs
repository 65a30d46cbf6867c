//! Bounded retry and deadlines for calls to external collaborators
//! (chain nodes, location resolvers, storage nodes).
//!
//! Only transient failures ([`Error::is_transient`]) are retried. Callers
//! that must fail secure treat the final error as a denial.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Error, Result};

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Randomize each delay into `[delay / 2, delay]`.
    pub jitter: bool,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max.max(base);
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry number `retry` (zero based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Runs an operation under a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent. The last error is returned.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(retries, "Collaborator call recovered");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(err);
            }
            if retries >= self.config.max_retries {
                warn!(attempts = retries + 1, error = %err, "Collaborator call failed");
                return Err(err);
            }

            let delay = self.config.backoff(retries);
            debug!(retry = retries + 1, delay_ms = delay.as_millis() as u64, error = %err, "Retrying");
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }
}

/// Bound a future by a deadline, mapping expiry to [`Error::Timeout`].
pub async fn with_timeout<Fut, T>(limit: Duration, what: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("{} after {:?}", what, limit))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(
            RetryConfig::new(max_retries)
                .with_delays(Duration::from_millis(1), Duration::from_millis(4))
                .without_jitter(),
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig::new(10)
            .with_delays(Duration::from_secs(1), Duration::from_secs(6))
            .without_jitter();

        assert_eq!(config.backoff(0), Duration::from_secs(1));
        assert_eq!(config.backoff(1), Duration::from_secs(2));
        assert_eq!(config.backoff(2), Duration::from_secs(4));
        assert_eq!(config.backoff(3), Duration::from_secs(6));
        assert_eq!(config.backoff(40), Duration::from_secs(6));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig::new(3).with_delays(Duration::from_millis(800), Duration::from_secs(5));
        for _ in 0..50 {
            let delay = config.backoff(0);
            assert!(delay >= Duration::from_millis(400) && delay <= Duration::from_millis(800));
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast(3)
            .execute(move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Network("node unreachable".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast(5)
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::NotFound("block 9".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast(2)
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Timeout("resolver".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout() {
        let slow: Result<()> = with_timeout(Duration::from_millis(10), "height read", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        match slow {
            Err(Error::Timeout(message)) => assert!(message.starts_with("height read")),
            other => panic!("expected timeout, got {:?}", other),
        }

        let fast = with_timeout(Duration::from_secs(1), "height read", async { Ok(7) }).await;
        assert_eq!(fast.unwrap(), 7);
    }
}
