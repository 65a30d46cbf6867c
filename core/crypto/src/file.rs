//! Whole-file authenticated encryption under password-derived keys.
//!
//! A payload carries everything needed to re-derive its key except the
//! password itself: salt, iteration count and algorithm identifiers. The
//! identifiers and iteration count are authenticated as associated data, so
//! downgrading any of them makes decryption fail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::aead::{self, AeadAlgorithm, NONCE_SIZE, TAG_SIZE};
use crate::kdf::{bind_key, derive_key, KdfParams};
use crate::keys::{DerivedKey, Salt, KEY_LENGTH};
use crate::rng::{os_random, random_array, SharedRandom};
use strongbox_common::{base64_bytes, Error, Result};

/// Default shard size when sharding is requested (1 MiB).
pub const DEFAULT_SHARD_SIZE: usize = 1024 * 1024;

const PROBE: &[u8] = b"strongbox-password-probe";

/// Key derivation function identifiers recorded in a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    /// Key is PBKDF2-HMAC-SHA256(password, salt, iterations).
    #[default]
    #[serde(rename = "PBKDF2-HMAC-SHA256")]
    Pbkdf2HmacSha256,
    /// PBKDF2 output further bound to a 32-byte secret with HKDF-SHA256.
    #[serde(rename = "PBKDF2-HMAC-SHA256+HKDF")]
    Pbkdf2HmacSha256Bound,
}

impl KdfAlgorithm {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Pbkdf2HmacSha256 => "PBKDF2-HMAC-SHA256",
            Self::Pbkdf2HmacSha256Bound => "PBKDF2-HMAC-SHA256+HKDF",
        }
    }

    fn is_bound(&self) -> bool {
        matches!(self, Self::Pbkdf2HmacSha256Bound)
    }
}

impl fmt::Display for KdfAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Options for a file encryption.
#[derive(Debug, Clone)]
pub struct EncryptOptions {
    /// Key derivation parameters.
    pub kdf: KdfParams,
    /// AEAD algorithm for the payload.
    pub algorithm: AeadAlgorithm,
    /// Split the plaintext into independently encrypted shards.
    pub enable_sharding: bool,
    /// Maximum plaintext bytes per shard.
    pub shard_size: usize,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            algorithm: AeadAlgorithm::default(),
            enable_sharding: false,
            shard_size: DEFAULT_SHARD_SIZE,
        }
    }
}

impl EncryptOptions {
    /// Set the iteration count.
    pub fn with_iterations(mut self, iterations: u32) -> Result<Self> {
        self.kdf = KdfParams::new(iterations)?;
        Ok(self)
    }

    /// Set the AEAD algorithm.
    pub fn with_algorithm(mut self, algorithm: AeadAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Enable sharding with the given shard size.
    pub fn with_sharding(mut self, shard_size: usize) -> Self {
        self.enable_sharding = true;
        self.shard_size = shard_size;
        self
    }
}

/// An encrypted file at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub tag: Vec<u8>,
    pub algorithm: AeadAlgorithm,
    pub key_derivation: KdfAlgorithm,
    pub iterations: u32,
    pub created_at: DateTime<Utc>,
}

impl EncryptedPayload {
    /// Serialize for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from storage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Size of the encrypted material (ciphertext, tag, nonce and salt).
    pub fn encrypted_size(&self) -> usize {
        self.ciphertext.len() + self.tag.len() + self.nonce.len() + self.salt.len()
    }

    /// Whether decrypting requires a binding secret in addition to the password.
    pub fn is_bound(&self) -> bool {
        self.key_derivation.is_bound()
    }

    fn associated_data(algorithm: AeadAlgorithm, kdf: KdfAlgorithm, iterations: u32) -> Vec<u8> {
        format!("strongbox:v1:{}:{}:{}", algorithm, kdf, iterations).into_bytes()
    }

    fn aad(&self) -> Vec<u8> {
        Self::associated_data(self.algorithm, self.key_derivation, self.iterations)
    }

    fn parts(&self) -> Result<([u8; NONCE_SIZE], [u8; TAG_SIZE])> {
        // Malformed framing is indistinguishable from tampering.
        let nonce: [u8; NONCE_SIZE] = self
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| Error::DecryptionFailed)?;
        let tag: [u8; TAG_SIZE] = self
            .tag
            .as_slice()
            .try_into()
            .map_err(|_| Error::DecryptionFailed)?;
        Ok((nonce, tag))
    }
}

/// Password-based file encryptor.
///
/// Holds the random source used for salts and nonces; otherwise stateless
/// and safe to share between tasks.
#[derive(Clone)]
pub struct FileEncryptor {
    rng: SharedRandom,
}

impl Default for FileEncryptor {
    fn default() -> Self {
        Self::new(os_random())
    }
}

impl FileEncryptor {
    /// Create an encryptor drawing randomness from `rng`.
    pub fn new(rng: SharedRandom) -> Self {
        Self { rng }
    }

    /// The random source used by this encryptor.
    pub fn rng(&self) -> &SharedRandom {
        &self.rng
    }

    /// Encrypt a plaintext under a password.
    ///
    /// # Preconditions
    /// - `password` must not be empty
    ///
    /// # Postconditions
    /// - Fresh 32-byte salt and 12-byte nonce
    /// - `decrypt(encrypt(p, w), w) == p`
    ///
    /// # Errors
    /// - `KeyDerivation` on empty password or invalid iteration count
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        password: &str,
        options: &EncryptOptions,
    ) -> Result<EncryptedPayload> {
        let salt = Salt::generate(self.rng.as_ref());
        let key = derive_key(password.as_bytes(), &salt, &options.kdf)?;
        self.seal(
            plaintext,
            &key,
            salt,
            options,
            KdfAlgorithm::Pbkdf2HmacSha256,
        )
    }

    /// Encrypt with a key that also depends on a 32-byte binding secret.
    ///
    /// Decryption requires both the password and the same binding secret.
    pub fn encrypt_bound(
        &self,
        plaintext: &[u8],
        password: &str,
        binding: &[u8; KEY_LENGTH],
        options: &EncryptOptions,
    ) -> Result<EncryptedPayload> {
        let salt = Salt::generate(self.rng.as_ref());
        let base = derive_key(password.as_bytes(), &salt, &options.kdf)?;
        let key = bind_key(&base, binding)?;
        self.seal(
            plaintext,
            &key,
            salt,
            options,
            KdfAlgorithm::Pbkdf2HmacSha256Bound,
        )
    }

    fn seal(
        &self,
        plaintext: &[u8],
        key: &DerivedKey,
        salt: Salt,
        options: &EncryptOptions,
        kdf: KdfAlgorithm,
    ) -> Result<EncryptedPayload> {
        let nonce: [u8; NONCE_SIZE] = random_array(self.rng.as_ref());
        let aad = EncryptedPayload::associated_data(options.algorithm, kdf, options.kdf.iterations);
        let (ciphertext, tag) =
            aead::seal(options.algorithm, key.as_bytes(), &nonce, plaintext, &aad)?;

        debug!(
            size = plaintext.len(),
            algorithm = %options.algorithm,
            iterations = options.kdf.iterations,
            "Encrypted payload"
        );

        Ok(EncryptedPayload {
            ciphertext,
            nonce: nonce.to_vec(),
            salt: salt.as_bytes().to_vec(),
            tag: tag.to_vec(),
            algorithm: options.algorithm,
            key_derivation: kdf,
            iterations: options.kdf.iterations,
            created_at: Utc::now(),
        })
    }

    /// Decrypt a payload with a password.
    ///
    /// # Errors
    /// - `DecryptionFailed` on wrong password or a tampered payload
    /// - `InvalidInput` if the payload was bound to a secret
    /// - `KeyDerivation` on an empty password
    pub fn decrypt(&self, payload: &EncryptedPayload, password: &str) -> Result<Vec<u8>> {
        if payload.is_bound() {
            return Err(Error::InvalidInput(
                "Payload requires a binding secret".to_string(),
            ));
        }
        let key = self.derive_for(payload, password)?;
        Self::open(payload, &key)
    }

    /// Decrypt a payload produced by [`FileEncryptor::encrypt_bound`].
    pub fn decrypt_bound(
        &self,
        payload: &EncryptedPayload,
        password: &str,
        binding: &[u8; KEY_LENGTH],
    ) -> Result<Vec<u8>> {
        if !payload.is_bound() {
            return Err(Error::InvalidInput(
                "Payload is not bound to a secret".to_string(),
            ));
        }
        let base = self.derive_for(payload, password)?;
        let key = bind_key(&base, binding)?;
        Self::open(payload, &key)
    }

    /// Check whether `password` opens `payload`.
    ///
    /// First round-trips a probe value under the key freshly derived from
    /// the payload's salt, then trial-decrypts the payload itself. Uses
    /// nothing that exists only at encryption time. Never fails.
    pub fn validate_password(&self, password: &str, payload: &EncryptedPayload) -> bool {
        let check = || -> Result<bool> {
            let key = self.derive_for(payload, password)?;

            let probe = aead::encrypt(
                payload.algorithm,
                key.as_bytes(),
                PROBE,
                b"",
                self.rng.as_ref(),
            )?;
            if aead::decrypt(payload.algorithm, key.as_bytes(), &probe, b"")? != PROBE {
                return Ok(false);
            }

            if payload.is_bound() {
                // Without the binding secret only the derivation can be checked.
                return Ok(true);
            }
            Ok(Self::open(payload, &key).is_ok())
        };

        check().unwrap_or(false)
    }

    fn derive_for(&self, payload: &EncryptedPayload, password: &str) -> Result<DerivedKey> {
        let salt = Salt::from_slice(&payload.salt).map_err(|_| Error::DecryptionFailed)?;
        // Stored parameters are untrusted; a bad count is a tampered payload.
        let params = KdfParams::new(payload.iterations).map_err(|_| Error::DecryptionFailed)?;
        derive_key(password.as_bytes(), &salt, &params)
    }

    fn open(payload: &EncryptedPayload, key: &DerivedKey) -> Result<Vec<u8>> {
        let (nonce, tag) = payload.parts()?;
        aead::open(
            payload.algorithm,
            key.as_bytes(),
            &nonce,
            &payload.ciphertext,
            &tag,
            &payload.aad(),
        )
    }
}
