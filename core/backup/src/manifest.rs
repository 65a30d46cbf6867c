//! Backup manifest: the self-describing pointer to a distributed backup.
//!
//! The manifest lists the content address of every encrypted shard in
//! order, with the plaintext digest of each. Shard keys travel inside the
//! manifest sealed under a key derived from the caller's encryption key,
//! so anyone can check which shards still exist but only the key holder
//! can restore.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use strongbox_common::{base64_bytes, Error, Result};
use strongbox_crypto::aead::{self, AeadAlgorithm};
use strongbox_crypto::{derive_key, FileKey, KdfParams, RandomSource, Salt, KEY_LENGTH};

/// Current manifest format version.
pub const MANIFEST_VERSION: u8 = 1;

/// One encrypted shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardEntry {
    pub index: u32,
    /// Content address of `nonce || ciphertext || tag`.
    pub address: String,
    /// Plaintext length.
    pub size: u64,
    /// Hex SHA-256 of the shard plaintext.
    pub plaintext_sha256: String,
}

/// Per-shard keys, concatenated in index order and sealed with AES-256-GCM
/// under a PBKDF2 key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedShardKeys {
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    pub iterations: u32,
    /// `nonce || ciphertext || tag`.
    #[serde(with = "base64_bytes")]
    pub sealed: Vec<u8>,
}

impl SealedShardKeys {
    fn associated_data(backup_id: &Uuid, shard_count: u32) -> Vec<u8> {
        format!("strongbox:backup-keys:v1:{}:{}", backup_id, shard_count).into_bytes()
    }

    /// Seal `keys` under `encryption_key`.
    pub fn seal(
        keys: &[FileKey],
        encryption_key: &str,
        params: &KdfParams,
        backup_id: &Uuid,
        rng: &dyn RandomSource,
    ) -> Result<Self> {
        let salt = Salt::generate(rng);
        let kek = derive_key(encryption_key.as_bytes(), &salt, params)?;

        let mut plain = Zeroizing::new(Vec::with_capacity(keys.len() * KEY_LENGTH));
        for key in keys {
            plain.extend_from_slice(key.as_bytes());
        }

        let aad = Self::associated_data(backup_id, keys.len() as u32);
        let sealed = aead::encrypt(AeadAlgorithm::Aes256Gcm, kek.as_bytes(), &plain, &aad, rng)?;

        Ok(Self {
            salt: salt.as_bytes().to_vec(),
            iterations: params.iterations,
            sealed,
        })
    }

    /// Recover the shard keys.
    ///
    /// # Errors
    /// - `DecryptionFailed` on a wrong encryption key or tampered manifest
    pub fn open(&self, encryption_key: &str, backup_id: &Uuid, shard_count: u32) -> Result<Vec<FileKey>> {
        let salt = Salt::from_slice(&self.salt).map_err(|_| Error::DecryptionFailed)?;
        let kek = derive_key(encryption_key.as_bytes(), &salt, &KdfParams::new(self.iterations)?)?;

        let aad = Self::associated_data(backup_id, shard_count);
        let plain = Zeroizing::new(aead::decrypt(
            AeadAlgorithm::Aes256Gcm,
            kek.as_bytes(),
            &self.sealed,
            &aad,
        )?);

        if plain.len() != shard_count as usize * KEY_LENGTH {
            return Err(Error::DecryptionFailed);
        }
        plain.chunks_exact(KEY_LENGTH).map(FileKey::from_slice).collect()
    }
}

/// Pointer object for one backup, stored in the content network itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DarknetManifest {
    pub version: u8,
    pub backup_id: Uuid,
    pub file_name: String,
    pub original_size: u64,
    pub shard_count: u32,
    pub shard_size: u64,
    pub shards: Vec<ShardEntry>,
    pub algorithm: AeadAlgorithm,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub replication_factor: u32,
    pub sealed_keys: SealedShardKeys,
}

impl DarknetManifest {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and sanity-check a manifest.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(data)
            .map_err(|e| Error::Serialization(format!("Not a backup manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.version != MANIFEST_VERSION {
            return Err(Error::Validation(format!(
                "Unsupported manifest version {}",
                self.version
            )));
        }
        if self.shards.len() != self.shard_count as usize {
            return Err(Error::Validation(format!(
                "Manifest lists {} shards but declares {}",
                self.shards.len(),
                self.shard_count
            )));
        }
        if self
            .shards
            .iter()
            .enumerate()
            .any(|(i, shard)| shard.index as usize != i)
        {
            return Err(Error::Validation("Manifest shards out of order".to_string()));
        }
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Shard content addresses in order.
    pub fn content_hashes(&self) -> Vec<String> {
        self.shards.iter().map(|s| s.address.clone()).collect()
    }
}
