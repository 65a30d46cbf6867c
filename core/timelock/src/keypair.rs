//! P-384 key pairs for key escrow.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use p384::{PublicKey, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

use strongbox_common::{Error, Result};
use strongbox_crypto::RandomSource;

/// Size of a P-384 scalar in bytes.
pub const SCALAR_SIZE: usize = 48;

// Out-of-range draws are astronomically rare; a handful of retries suffices.
const MAX_SCALAR_ATTEMPTS: usize = 16;

/// Draw a valid P-384 secret scalar from `rng`.
pub(crate) fn random_secret(rng: &dyn RandomSource) -> Result<SecretKey> {
    for _ in 0..MAX_SCALAR_ATTEMPTS {
        let mut bytes = Zeroizing::new([0u8; SCALAR_SIZE]);
        rng.fill_bytes(&mut bytes[..]);
        if let Ok(secret) = SecretKey::from_slice(&bytes[..]) {
            return Ok(secret);
        }
    }
    Err(Error::Crypto(
        "Random source produced no valid P-384 scalar".to_string(),
    ))
}

/// Public half: a SEC1-encoded P-384 point.
#[derive(Clone, PartialEq, Eq)]
pub struct TimelockPublicKey(PublicKey);

impl TimelockPublicKey {
    pub(crate) fn inner(&self) -> &PublicKey {
        &self.0
    }

    /// SEC1 encoding of the point.
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_sec1_bytes().to_vec()
    }

    /// Parse a SEC1-encoded point.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| Error::InvalidInput("Invalid P-384 public key".to_string()))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_sec1_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidInput(format!("Invalid public key encoding: {}", e)))?;
        Self::from_sec1_bytes(&bytes)
    }
}

impl fmt::Debug for TimelockPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimelockPublicKey({})", self.to_base64())
    }
}

impl Serialize for TimelockPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for TimelockPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Private half. Zeroized on drop by `p384`.
#[derive(Clone)]
pub struct TimelockPrivateKey(SecretKey);

impl TimelockPrivateKey {
    pub(crate) fn inner(&self) -> &SecretKey {
        &self.0
    }

    /// The matching public key.
    pub fn public_key(&self) -> TimelockPublicKey {
        TimelockPublicKey(self.0.public_key())
    }

    /// Export the 48-byte scalar as base64.
    ///
    /// # Security
    /// The result is the key. Hand it to its owner and do not keep it.
    pub fn to_base64(&self) -> String {
        let mut bytes = Zeroizing::new([0u8; SCALAR_SIZE]);
        bytes.copy_from_slice(&self.0.to_bytes());
        STANDARD.encode(&bytes[..])
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| Error::InvalidInput(format!("Invalid private key encoding: {}", e)))?,
        );
        if bytes.len() != SCALAR_SIZE {
            return Err(Error::InvalidInput("Invalid P-384 private key".to_string()));
        }
        SecretKey::from_slice(&bytes)
            .map(Self)
            .map_err(|_| Error::InvalidInput("Invalid P-384 private key".to_string()))
    }
}

impl fmt::Debug for TimelockPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimelockPrivateKey([REDACTED])")
    }
}

/// Key pair generated per timelock encryption.
#[derive(Debug, Clone)]
pub struct TimelockKeyPair {
    pub public: TimelockPublicKey,
    pub private: TimelockPrivateKey,
}

impl TimelockKeyPair {
    /// Generate a fresh key pair.
    pub fn generate(rng: &dyn RandomSource) -> Result<Self> {
        let secret = random_secret(rng)?;
        let public = TimelockPublicKey(secret.public_key());
        Ok(Self {
            public,
            private: TimelockPrivateKey(secret),
        })
    }
}
