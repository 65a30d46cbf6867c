//! Common error types for Strongbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A timelock sub-condition that has not been met yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UnmetCondition {
    /// Wall-clock time has not reached the unlock instant.
    Timestamp {
        unlock_at: DateTime<Utc>,
    },
    /// The chain has not reached the target height, or the height is unknown.
    BlockHeight {
        target: u64,
        current: Option<u64>,
    },
}

impl fmt::Display for UnmetCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp { unlock_at } => write!(f, "unlocks at {}", unlock_at.to_rfc3339()),
            Self::BlockHeight {
                target,
                current: Some(current),
            } => write!(f, "unlocks at block {} (current {})", target, current),
            Self::BlockHeight {
                target,
                current: None,
            } => write!(f, "unlocks at block {} (current height unavailable)", target),
        }
    }
}

fn join_unmet(unmet: &[UnmetCondition]) -> String {
    unmet
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level error type for Strongbox operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Key derivation parameters were rejected.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Wrong password or corrupted/tampered payload.
    ///
    /// Deliberately carries no detail: callers must not be able to tell the
    /// two causes apart.
    #[error("Decryption failed")]
    DecryptionFailed,

    /// A shard decrypted but its plaintext digest did not match.
    #[error("Shard integrity check failed for shard {index}")]
    ShardIntegrity { index: u32 },

    /// The timelock condition guarding a key has not been satisfied.
    #[error("Timelock not yet unlockable: {}", join_unmet(.unmet))]
    TimelockNotYetUnlockable { unmet: Vec<UnmetCondition> },

    /// Not enough shards could be fetched to reassemble a backup.
    #[error("Missing shards: {available} of {required} available")]
    MissingShards { available: usize, required: usize },

    /// Malformed request (size limits, parameter bounds, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Cryptographic operation failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network request to a collaborator failed.
    #[error("Network error: {0}")]
    Network(String),

    /// A collaborator did not answer in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether retrying the operation might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
