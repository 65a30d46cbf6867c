//! Key derivation and password hashing.
//!
//! File keys are stretched from passwords with PBKDF2-HMAC-SHA256. The
//! derivation is deterministic, which is what lets decryption work without
//! ever storing a key: the salt and iteration count travel with the payload.
//!
//! Account credentials use bcrypt and are unrelated to file-key derivation.

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::keys::{DerivedKey, Salt, KEY_LENGTH};
use crate::rng::{random_array, RandomSource};
use strongbox_common::{Error, Result};

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Lowest accepted PBKDF2 iteration count.
pub const MIN_ITERATIONS: u32 = 10_000;

/// Highest accepted PBKDF2 iteration count.
pub const MAX_ITERATIONS: u32 = 1_000_000;

/// bcrypt work factor for account passwords.
pub const BCRYPT_COST: u32 = 12;

const BINDING_INFO: &[u8] = b"strongbox/v1/bound-file-key";

/// Parameters for PBKDF2 key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Number of PBKDF2 iterations.
    pub iterations: u32,
}

impl KdfParams {
    /// Create parameters, checking the iteration bounds.
    pub fn new(iterations: u32) -> Result<Self> {
        let params = Self { iterations };
        params.validate()?;
        Ok(params)
    }

    /// Check the iteration count is within the supported range.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.iterations) {
            return Err(Error::KeyDerivation(format!(
                "Iteration count {} outside {}..={}",
                self.iterations, MIN_ITERATIONS, MAX_ITERATIONS
            )));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Derive a 256-bit key from a password and salt using PBKDF2-HMAC-SHA256.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params.iterations` must be within `MIN_ITERATIONS..=MAX_ITERATIONS`
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - `KeyDerivation` on an empty password or out-of-range iterations
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<DerivedKey> {
    if password.is_empty() {
        return Err(Error::KeyDerivation("Password cannot be empty".to_string()));
    }
    params.validate()?;

    let mut key_bytes = [0u8; KEY_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt.as_bytes(), params.iterations, &mut key_bytes);

    Ok(DerivedKey::from_bytes(key_bytes))
}

/// Derive a key from a biometric template.
///
/// This is a plain SHA-256 over template and salt. It is an extension point
/// for a future fuzzy extractor, not a security-grade primitive: biometric
/// templates are neither secret nor stable enough to stretch like passwords.
pub fn derive_biometric_key(biometric: &[u8], salt: &Salt) -> Result<DerivedKey> {
    if biometric.is_empty() {
        return Err(Error::KeyDerivation(
            "Biometric payload cannot be empty".to_string(),
        ));
    }

    let mut hasher = Sha256::new();
    hasher.update(biometric);
    hasher.update(salt.as_bytes());

    let mut key_bytes = [0u8; KEY_LENGTH];
    key_bytes.copy_from_slice(&hasher.finalize());
    Ok(DerivedKey::from_bytes(key_bytes))
}

/// Mix a 32-byte binding secret into a derived key with HKDF-SHA256.
///
/// The result can only be reproduced by someone holding both the password
/// and the binding secret.
pub fn bind_key(key: &DerivedKey, binding: &[u8; KEY_LENGTH]) -> Result<DerivedKey> {
    let hk = Hkdf::<Sha256>::new(Some(&binding[..]), key.as_bytes());
    let mut okm = [0u8; KEY_LENGTH];
    hk.expand(BINDING_INFO, &mut okm)
        .map_err(|e| Error::KeyDerivation(format!("HKDF expand failed: {}", e)))?;
    Ok(DerivedKey::from_bytes(okm))
}

/// Hash an account password with bcrypt (cost [`BCRYPT_COST`]).
pub fn hash_password(password: &str, rng: &dyn RandomSource) -> Result<String> {
    if password.is_empty() {
        return Err(Error::KeyDerivation("Password cannot be empty".to_string()));
    }

    let salt: [u8; 16] = random_array(rng);
    let parts = bcrypt::hash_with_salt(password, BCRYPT_COST, salt)
        .map_err(|e| Error::KeyDerivation(format!("bcrypt failed: {}", e)))?;

    Ok(parts.format_for_version(bcrypt::Version::TwoB))
}

/// Check an account password against a bcrypt hash.
///
/// Never fails: malformed hashes and mismatches both yield `false`.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}
