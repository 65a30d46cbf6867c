//! Settable oracle for tests and offline use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::oracle::BlockHeightOracle;
use strongbox_common::{Error, Result};

/// Oracle whose height is set by the caller.
///
/// Can be switched into a failing mode to exercise fail-secure paths.
#[derive(Debug, Default)]
pub struct FixedOracle {
    height: AtomicU64,
    timestamps: RwLock<BTreeMap<u64, DateTime<Utc>>>,
    failing: AtomicBool,
}

impl FixedOracle {
    /// Create an oracle reporting `height`.
    pub fn new(height: u64) -> Self {
        Self {
            height: AtomicU64::new(height),
            ..Default::default()
        }
    }

    /// Set the reported height.
    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Advance the reported height by `blocks`.
    pub fn advance(&self, blocks: u64) -> u64 {
        self.height.fetch_add(blocks, Ordering::SeqCst) + blocks
    }

    /// Record the timestamp of a block.
    pub fn set_block_timestamp(&self, height: u64, timestamp: DateTime<Utc>) {
        self.timestamps
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(height, timestamp);
    }

    /// Make every call fail with a network error (or recover).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Network("Oracle unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockHeightOracle for FixedOracle {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn current_height(&self) -> Result<u64> {
        self.check()?;
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn block_timestamp(&self, height: u64) -> Result<DateTime<Utc>> {
        self.check()?;
        self.timestamps
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&height)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("Block {} not found", height)))
    }
}
