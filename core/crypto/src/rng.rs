//! Injectable randomness.
//!
//! Every component that needs random bytes (salts, nonces, per-shard keys,
//! ephemeral EC scalars) takes a [`RandomSource`] instead of reaching for a
//! global RNG, so tests can run against a seeded, reproducible stream.

use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::{Arc, Mutex};

/// Source of cryptographically secure random bytes.
pub trait RandomSource: Send + Sync {
    /// Fill `dest` with random bytes.
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Shared handle to a random source.
pub type SharedRandom = Arc<dyn RandomSource>;

/// Draw a fixed-size array from a random source.
pub fn random_array<const N: usize>(rng: &dyn RandomSource) -> [u8; N] {
    let mut out = [0u8; N];
    rng.fill_bytes(&mut out);
    out
}

/// Operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

/// Shared OS random source.
pub fn os_random() -> SharedRandom {
    Arc::new(OsRandom)
}

/// Deterministic ChaCha20 stream for reproducible tests.
///
/// Not for production use: anyone who knows the seed knows every key.
pub struct SeededRandom {
    rng: Mutex<ChaCha20Rng>,
}

impl SeededRandom {
    /// Create a stream from a 64-bit seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }

    /// Create a shared handle from a 64-bit seed.
    pub fn shared(seed: u64) -> SharedRandom {
        Arc::new(Self::from_seed(seed))
    }
}

impl RandomSource for SeededRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.fill_bytes(dest);
    }
}
