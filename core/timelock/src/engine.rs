//! Gated timelock encryption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::condition::{evaluate_condition, ConditionEvaluation, TimelockCondition};
use crate::escrow::{escrow_file_key, release_file_key, EscrowedKey};
use crate::keypair::{TimelockKeyPair, TimelockPrivateKey, TimelockPublicKey};
use strongbox_chain::{HeightEstimator, SharedOracle, DEFAULT_BLOCK_INTERVAL};
use strongbox_common::{Error, Result};
use strongbox_crypto::{EncryptOptions, EncryptedPayload, FileEncryptor, FileKey};

/// Where a timelock condition stands. Decryption itself is stateless:
/// the engine keeps nothing per artifact, so an `Unlockable` artifact can
/// be opened any number of times by a holder of the key and password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelockState {
    Locked,
    Unlockable,
}

/// Everything stored for a timelocked file. Holds no secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelockArtifact {
    pub payload: EncryptedPayload,
    pub condition: TimelockCondition,
    pub escrowed_key: EscrowedKey,
    pub public_key: TimelockPublicKey,
}

/// Result of a timelock encryption: the artifact plus the private key that
/// must be handed to the requester. The engine keeps no copy.
#[derive(Debug, Clone)]
pub struct TimelockSealed {
    pub artifact: TimelockArtifact,
    pub private_key: TimelockPrivateKey,
}

/// Diagnostic view of a condition.
///
/// `is_satisfied` comes from the real oracle only. The estimate fields may
/// be extrapolated when the oracle is down; `estimated` says so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelockStatus {
    pub state: TimelockState,
    pub is_satisfied: bool,
    pub timestamp_satisfied: Option<bool>,
    pub height_satisfied: Option<bool>,
    pub current_height: Option<u64>,
    pub remaining_seconds: Option<u64>,
    pub blocks_remaining: Option<u64>,
    pub estimated_unlock_at: Option<DateTime<Utc>>,
    pub estimated: bool,
    pub checked_at: DateTime<Utc>,
}

/// Timelock encrypt/decrypt over an injected oracle and clock.
///
/// The oracle should already carry a timeout and retry policy
/// (see `strongbox_chain::GuardedOracle`).
pub struct TimelockEngine {
    encryptor: FileEncryptor,
    oracle: SharedOracle,
    clock: SharedClock,
    block_interval: Duration,
    last_observation: Mutex<Option<(u64, DateTime<Utc>)>>,
}

impl TimelockEngine {
    pub fn new(encryptor: FileEncryptor, oracle: SharedOracle, clock: SharedClock) -> Self {
        Self {
            encryptor,
            oracle,
            clock,
            block_interval: DEFAULT_BLOCK_INTERVAL,
            last_observation: Mutex::new(None),
        }
    }

    /// Average block interval used for estimates.
    pub fn with_block_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.block_interval = interval;
        }
        self
    }

    pub fn oracle(&self) -> &SharedOracle {
        &self.oracle
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Generate a key pair from the engine's random source.
    pub fn generate_keypair(&self) -> Result<TimelockKeyPair> {
        TimelockKeyPair::generate(self.encryptor.rng().as_ref())
    }

    /// Encrypt `plaintext` so it opens only with the password, the returned
    /// private key, and once `condition` holds.
    ///
    /// # Errors
    /// - `Validation` if the condition lacks a field its mode requires
    /// - `KeyDerivation` on an empty password
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        password: &str,
        condition: TimelockCondition,
        options: &EncryptOptions,
    ) -> Result<TimelockSealed> {
        condition.validate()?;

        let rng = self.encryptor.rng().as_ref();
        let keypair = self.generate_keypair()?;
        let escrow_secret = FileKey::generate(rng);

        let payload =
            self.encryptor
                .encrypt_bound(plaintext, password, escrow_secret.as_bytes(), options)?;
        let escrowed_key =
            escrow_file_key(&escrow_secret, &keypair.public, &condition.binding(), rng)?;

        info!(
            mode = %condition.mode,
            unlock_at = ?condition.unlock_at,
            unlock_height = ?condition.unlock_height,
            size = plaintext.len(),
            "Timelock encrypted"
        );

        Ok(TimelockSealed {
            artifact: TimelockArtifact {
                payload,
                condition,
                escrowed_key,
                public_key: keypair.public,
            },
            private_key: keypair.private,
        })
    }

    /// Evaluate a condition now. Remembers the oracle reading for later
    /// estimates.
    pub async fn evaluate(&self, condition: &TimelockCondition) -> ConditionEvaluation {
        let now = self.clock.now();
        let evaluation = evaluate_condition(condition, now, self.oracle.as_ref()).await;
        if let Some(height) = evaluation.current_height {
            *self
                .last_observation
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((height, now));
        }
        evaluation
    }

    /// Decrypt a timelocked artifact.
    ///
    /// # Errors
    /// - `TimelockNotYetUnlockable` listing the unmet sub-conditions
    /// - `DecryptionFailed` on a wrong private key, wrong password or
    ///   tampered artifact, including a condition other than the one it
    ///   was sealed with
    pub async fn decrypt(
        &self,
        artifact: &TimelockArtifact,
        password: &str,
        private_key: &TimelockPrivateKey,
    ) -> Result<Vec<u8>> {
        let evaluation = self.evaluate(&artifact.condition).await;
        if !evaluation.is_satisfied {
            debug!(unmet = evaluation.unmet.len(), "Timelock still locked");
            return Err(Error::TimelockNotYetUnlockable {
                unmet: evaluation.unmet,
            });
        }

        let escrow_secret = release_file_key(
            &artifact.escrowed_key,
            private_key,
            &artifact.condition.binding(),
        )
        .ok_or(Error::DecryptionFailed)?;
        let plaintext =
            self.encryptor
                .decrypt_bound(&artifact.payload, password, escrow_secret.as_bytes())?;

        info!(size = plaintext.len(), "Timelock released");
        Ok(plaintext)
    }

    /// Report where a condition stands.
    pub async fn status(&self, condition: &TimelockCondition) -> TimelockStatus {
        let evaluation = self.evaluate(condition).await;
        let now = evaluation.evaluated_at;

        let remaining_seconds = condition
            .unlock_at
            .map(|at| (at - now).num_seconds().max(0) as u64);

        let (current_height, estimated) = match (condition.unlock_height, evaluation.current_height) {
            (None, _) => (None, false),
            (Some(_), Some(height)) => (Some(height), false),
            (Some(_), None) => (self.fallback_height(now), true),
        };

        let blocks_remaining = condition
            .unlock_height
            .zip(current_height)
            .map(|(target, current)| target.saturating_sub(current));

        let height_eta = match (condition.unlock_height, current_height) {
            (Some(target), Some(current)) => {
                Some(HeightEstimator::new(current, now, self.block_interval).time_of(target).max(now))
            }
            (Some(_), None) => None,
            (None, _) => Some(now),
        };
        let time_eta = condition.unlock_at.unwrap_or(now).max(now);
        let estimated_unlock_at = height_eta.map(|eta| eta.max(time_eta));

        TimelockStatus {
            state: if evaluation.is_satisfied {
                TimelockState::Unlockable
            } else {
                TimelockState::Locked
            },
            is_satisfied: evaluation.is_satisfied,
            timestamp_satisfied: evaluation.timestamp_satisfied,
            height_satisfied: evaluation.height_satisfied,
            current_height,
            remaining_seconds,
            blocks_remaining,
            estimated_unlock_at,
            estimated,
            checked_at: now,
        }
    }

    fn fallback_height(&self, now: DateTime<Utc>) -> Option<u64> {
        let observation = *self
            .last_observation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match observation {
            Some((height, at)) => {
                let estimate = HeightEstimator::new(height, at, self.block_interval).height_at(now);
                warn!(
                    last_height = height,
                    estimate, "Oracle unavailable, estimating height"
                );
                Some(estimate)
            }
            None => {
                warn!("Oracle unavailable and no prior reading to estimate from");
                None
            }
        }
    }
}
