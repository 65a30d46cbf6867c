//! Timelocked encryption for Strongbox.
//!
//! A timelocked file is encrypted under a key bound to a random escrow
//! secret. The escrow secret is wrapped to a fresh P-384 key pair whose
//! private half goes to the requester. Decryption is refused until the
//! unlock condition (a wall-clock instant, a block height, or both) holds.
//!
//! A condition is `Locked` until it holds, then `Unlockable`; opening an
//! unlockable artifact yields the plaintext and leaves no engine state.
//! The condition is authenticated with the escrowed secret, so editing it
//! makes release fail. Condition evaluation fails secure: an unreachable
//! height oracle means "locked".

pub mod clock;
pub mod condition;
pub mod engine;
pub mod escrow;
pub mod keypair;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use condition::{evaluate_condition, ConditionEvaluation, TimelockCondition, TimelockMode};
pub use engine::{TimelockArtifact, TimelockEngine, TimelockSealed, TimelockState, TimelockStatus};
pub use escrow::{escrow_file_key, release_file_key, EscrowedKey};
pub use keypair::{TimelockKeyPair, TimelockPrivateKey, TimelockPublicKey};
