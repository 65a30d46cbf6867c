//! Fallback height estimation from an average block interval.
//!
//! Estimates feed status displays ("about 3 hours left"). They are never
//! used to decide whether a timelock is satisfied.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Average Ethereum block interval.
pub const DEFAULT_BLOCK_INTERVAL: Duration = Duration::from_secs(12);

// Ten thousand years; keeps absurd heights inside chrono's range.
const MAX_OFFSET_MS: i128 = 10_000 * 365 * 86_400 * 1_000;

/// Linear height/time extrapolation from one known reference block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeightEstimator {
    reference_height: u64,
    reference_time: DateTime<Utc>,
    block_interval: Duration,
}

impl HeightEstimator {
    /// Create an estimator anchored at (`height`, `time`).
    ///
    /// A zero interval is replaced by [`DEFAULT_BLOCK_INTERVAL`].
    pub fn new(height: u64, time: DateTime<Utc>, block_interval: Duration) -> Self {
        let block_interval = if block_interval.is_zero() {
            DEFAULT_BLOCK_INTERVAL
        } else {
            block_interval
        };
        Self {
            reference_height: height,
            reference_time: time,
            block_interval,
        }
    }

    pub fn block_interval(&self) -> Duration {
        self.block_interval
    }

    /// Estimated height at `time` (never below zero).
    pub fn height_at(&self, time: DateTime<Utc>) -> u64 {
        let elapsed_ms = (time - self.reference_time).num_milliseconds();
        let interval_ms = self.block_interval.as_millis() as i64;
        let blocks = elapsed_ms.div_euclid(interval_ms);

        if blocks >= 0 {
            self.reference_height.saturating_add(blocks as u64)
        } else {
            self.reference_height.saturating_sub(blocks.unsigned_abs())
        }
    }

    /// Estimated time at which `height` is reached.
    pub fn time_of(&self, height: u64) -> DateTime<Utc> {
        let interval_ms = self.block_interval.as_millis() as i128;
        let blocks = height as i128 - self.reference_height as i128;
        let offset_ms = (blocks * interval_ms).clamp(-MAX_OFFSET_MS, MAX_OFFSET_MS) as i64;

        self.reference_time
            .checked_add_signed(ChronoDuration::milliseconds(offset_ms))
            .unwrap_or(self.reference_time)
    }
}
