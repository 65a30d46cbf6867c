//! Unlock conditions and their evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use strongbox_chain::BlockHeightOracle;
use strongbox_common::{Error, Result, UnmetCondition};

/// Which sub-conditions must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimelockMode {
    /// Wall-clock time only.
    Timestamp,
    /// Block height only.
    #[serde(rename = "BlockNumber", alias = "BlockHeight")]
    BlockHeight,
    /// Both, each independently.
    Hybrid,
}

impl fmt::Display for TimelockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp => f.write_str("Timestamp"),
            Self::BlockHeight => f.write_str("BlockNumber"),
            Self::Hybrid => f.write_str("Hybrid"),
        }
    }
}

impl FromStr for TimelockMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "timestamp" | "time" => Ok(Self::Timestamp),
            "blocknumber" | "blockheight" | "block" => Ok(Self::BlockHeight),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(Error::Validation(format!("Unknown timelock type: {}", s))),
        }
    }
}

/// When an escrowed key may be released.
///
/// Each sub-condition is checked when its field is set. A condition with
/// neither field set is satisfied immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelockCondition {
    pub mode: TimelockMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_height: Option<u64>,
}

impl TimelockCondition {
    pub fn timestamp(unlock_at: DateTime<Utc>) -> Self {
        Self {
            mode: TimelockMode::Timestamp,
            unlock_at: Some(unlock_at),
            unlock_height: None,
        }
    }

    pub fn block_height(unlock_height: u64) -> Self {
        Self {
            mode: TimelockMode::BlockHeight,
            unlock_at: None,
            unlock_height: Some(unlock_height),
        }
    }

    pub fn hybrid(unlock_at: DateTime<Utc>, unlock_height: u64) -> Self {
        Self {
            mode: TimelockMode::Hybrid,
            unlock_at: Some(unlock_at),
            unlock_height: Some(unlock_height),
        }
    }

    /// Build a condition from request fields, keeping only the fields the
    /// mode uses.
    ///
    /// # Errors
    /// - `Validation` if a field the mode requires is missing
    pub fn from_parts(
        mode: TimelockMode,
        unlock_at: Option<DateTime<Utc>>,
        unlock_height: Option<u64>,
    ) -> Result<Self> {
        let condition = match mode {
            TimelockMode::Timestamp => Self {
                mode,
                unlock_at,
                unlock_height: None,
            },
            TimelockMode::BlockHeight => Self {
                mode,
                unlock_at: None,
                unlock_height,
            },
            TimelockMode::Hybrid => Self {
                mode,
                unlock_at,
                unlock_height,
            },
        };
        condition.validate()?;
        Ok(condition)
    }

    /// Check the fields required by the mode are present.
    pub fn validate(&self) -> Result<()> {
        let needs_time = matches!(self.mode, TimelockMode::Timestamp | TimelockMode::Hybrid);
        let needs_height = matches!(self.mode, TimelockMode::BlockHeight | TimelockMode::Hybrid);

        if needs_time && self.unlock_at.is_none() {
            return Err(Error::Validation(format!(
                "{} timelock requires an unlock time",
                self.mode
            )));
        }
        if needs_height && self.unlock_height.is_none() {
            return Err(Error::Validation(format!(
                "{} timelock requires an unlock block number",
                self.mode
            )));
        }
        Ok(())
    }

    /// Whether no sub-condition is set.
    pub fn is_unconditional(&self) -> bool {
        self.unlock_at.is_none() && self.unlock_height.is_none()
    }

    /// Canonical bytes authenticated alongside the escrowed key, so an
    /// artifact only opens under the condition it was sealed with.
    pub fn binding(&self) -> Vec<u8> {
        let unlock_at = self
            .unlock_at
            .map(|at| format!("{}.{:09}", at.timestamp(), at.timestamp_subsec_nanos()))
            .unwrap_or_else(|| "-".to_string());
        let unlock_height = self
            .unlock_height
            .map(|height| height.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!("mode={};at={};height={}", self.mode, unlock_at, unlock_height).into_bytes()
    }
}

/// Result of evaluating a condition at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionEvaluation {
    pub is_satisfied: bool,
    /// `None` when the condition has no time component.
    pub timestamp_satisfied: Option<bool>,
    /// `None` when the condition has no height component.
    pub height_satisfied: Option<bool>,
    /// Height reported by the oracle, if it was asked and answered.
    pub current_height: Option<u64>,
    pub evaluated_at: DateTime<Utc>,
    /// Sub-conditions that do not hold yet.
    pub unmet: Vec<UnmetCondition>,
}

/// Evaluate `condition` at `now`.
///
/// Never fails: an oracle error leaves the height sub-condition unmet, so
/// the condition as a whole fails secure.
pub async fn evaluate_condition(
    condition: &TimelockCondition,
    now: DateTime<Utc>,
    oracle: &dyn BlockHeightOracle,
) -> ConditionEvaluation {
    let mut unmet = Vec::new();

    let timestamp_satisfied = condition.unlock_at.map(|unlock_at| {
        let satisfied = now >= unlock_at;
        if !satisfied {
            unmet.push(UnmetCondition::Timestamp { unlock_at });
        }
        satisfied
    });

    let mut current_height = None;
    let height_satisfied = match condition.unlock_height {
        None => None,
        Some(target) => {
            let satisfied = match oracle.current_height().await {
                Ok(height) => {
                    current_height = Some(height);
                    height >= target
                }
                Err(e) => {
                    warn!(oracle = oracle.name(), error = %e, "Height oracle unavailable, treating as locked");
                    false
                }
            };
            if !satisfied {
                unmet.push(UnmetCondition::BlockHeight {
                    target,
                    current: current_height,
                });
            }
            Some(satisfied)
        }
    };

    ConditionEvaluation {
        is_satisfied: timestamp_satisfied.unwrap_or(true) && height_satisfied.unwrap_or(true),
        timestamp_satisfied,
        height_satisfied,
        current_height,
        evaluated_at: now,
        unmet,
    }
}
