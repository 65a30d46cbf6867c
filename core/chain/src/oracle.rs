//! Oracle trait and the timeout/retry guard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use strongbox_common::{with_timeout, Result, RetryConfig, RetryExecutor};

/// Read-only view of a blockchain's progress.
#[async_trait]
pub trait BlockHeightOracle: Send + Sync {
    /// Name of the oracle (e.g., "jsonrpc", "fixed").
    fn name(&self) -> &str;

    /// Current chain height.
    ///
    /// # Errors
    /// - Network errors reaching the chain
    async fn current_height(&self) -> Result<u64>;

    /// Timestamp of the block at `height`.
    ///
    /// # Errors
    /// - `NotFound` if the block does not exist yet
    /// - Network errors reaching the chain
    async fn block_timestamp(&self, height: u64) -> Result<DateTime<Utc>>;
}

/// Shared handle to an oracle.
pub type SharedOracle = Arc<dyn BlockHeightOracle>;

/// Oracle wrapper bounding every call with a timeout and retrying
/// transient failures.
pub struct GuardedOracle {
    inner: SharedOracle,
    timeout: Duration,
    retry: RetryExecutor,
}

impl GuardedOracle {
    /// Wrap `inner` with a per-attempt timeout and retry policy.
    pub fn new(inner: SharedOracle, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            inner,
            timeout,
            retry: RetryExecutor::new(retry),
        }
    }

    /// Shared handle to the wrapper.
    pub fn shared(inner: SharedOracle, timeout: Duration, retry: RetryConfig) -> SharedOracle {
        Arc::new(Self::new(inner, timeout, retry))
    }
}

#[async_trait]
impl BlockHeightOracle for GuardedOracle {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn current_height(&self) -> Result<u64> {
        self.retry
            .execute(|| with_timeout(self.timeout, "block height", self.inner.current_height()))
            .await
    }

    async fn block_timestamp(&self, height: u64) -> Result<DateTime<Utc>> {
        self.retry
            .execute(|| {
                with_timeout(
                    self.timeout,
                    "block timestamp",
                    self.inner.block_timestamp(height),
                )
            })
            .await
    }
}
