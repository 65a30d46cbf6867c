//! Symmetric key material and salts.
//!
//! Keys are wiped when dropped and print as `[REDACTED]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::rng::{random_array, RandomSource};
use strongbox_common::{Error, Result};

/// AES-256 / ChaCha20 key size.
pub const KEY_LENGTH: usize = 32;

/// Length of key-derivation salts in bytes.
pub const SALT_LENGTH: usize = 32;

/// Key derived from a password (or biometric template).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_LENGTH],
}

impl DerivedKey {
    /// Create a derived key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Borrow the key for a single cipher construction; do not copy it out.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

/// Randomly generated symmetric key (per-shard keys, escrowed secrets).
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct FileKey {
    key: [u8; KEY_LENGTH],
}

impl FileKey {
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a file key from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            Error::Crypto(format!(
                "Invalid key length: expected {}, got {}",
                KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Fresh key drawn from `rng`.
    pub fn generate(rng: &dyn RandomSource) -> Self {
        Self {
            key: random_array(rng),
        }
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileKey([REDACTED])")
    }
}

/// Per-artifact PBKDF2 salt. Stored in clear next to the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    pub fn generate(rng: &dyn RandomSource) -> Self {
        Self(random_array(rng))
    }

    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let salt: [u8; SALT_LENGTH] = bytes.try_into().map_err(|_| {
            Error::Validation(format!(
                "Invalid salt length: expected {}, got {}",
                SALT_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(salt))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{OsRandom, SeededRandom};

    #[test]
    fn test_os_random_keys_differ() {
        let first = FileKey::generate(&OsRandom);
        let second = FileKey::generate(&OsRandom);
        assert_ne!(first, second);
    }

    #[test]
    fn test_seeded_salts_are_reproducible() {
        let salt1 = Salt::generate(&SeededRandom::from_seed(1));
        let salt2 = Salt::generate(&SeededRandom::from_seed(1));
        assert_eq!(salt1, salt2);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(FileKey::from_slice(&[0u8; 16]).is_err());
        assert!(Salt::from_slice(&[0u8; 31]).is_err());
        assert!(Salt::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_debug_redacts() {
        let key = FileKey::from_bytes([9u8; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "FileKey([REDACTED])");
    }
}
