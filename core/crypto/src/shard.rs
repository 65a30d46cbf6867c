//! Sharded file encryption.
//!
//! A plaintext is cut into contiguous chunks of at most `shard_size` bytes.
//! Every chunk is a full [`EncryptedPayload`] with its own salt and nonce, so
//! each shard key is re-derivable from the password and what the shard
//! itself stores.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::file::{EncryptOptions, EncryptedPayload, FileEncryptor};
use crate::hash::{hash_bytes, verify_hash, HashAlgorithm};
use crate::rng::random_array;
use strongbox_common::{Error, Result};

/// One independently encrypted slice of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedShard {
    pub shard_id: Uuid,
    pub index: u32,
    pub payload: EncryptedPayload,
    /// Hex SHA-256 of the shard plaintext.
    pub plaintext_digest: String,
}

/// Number of shards a plaintext of `len` bytes splits into.
pub fn shard_count(len: usize, shard_size: usize) -> usize {
    if shard_size == 0 {
        return 0;
    }
    len.div_ceil(shard_size)
}

impl FileEncryptor {
    /// Split `plaintext` into shards and encrypt each one independently.
    ///
    /// # Postconditions
    /// - Returns `ceil(len / shard_size)` shards indexed `0..n`
    /// - Only the last shard may be shorter than `shard_size`
    ///
    /// # Errors
    /// - `Validation` if `shard_size` is zero
    /// - `KeyDerivation` on empty password or invalid iterations
    pub fn encrypt_shards(
        &self,
        plaintext: &[u8],
        password: &str,
        shard_size: usize,
        options: &EncryptOptions,
    ) -> Result<Vec<EncryptedShard>> {
        if shard_size == 0 {
            return Err(Error::Validation(
                "Shard size must be greater than zero".to_string(),
            ));
        }

        let mut shards = Vec::with_capacity(shard_count(plaintext.len(), shard_size));
        for (index, chunk) in plaintext.chunks(shard_size).enumerate() {
            let index = u32::try_from(index)
                .map_err(|_| Error::Validation("Too many shards".to_string()))?;
            let payload = self.encrypt(chunk, password, options)?;
            let shard_id = uuid::Builder::from_random_bytes(random_array(self.rng().as_ref()))
                .into_uuid();

            shards.push(EncryptedShard {
                shard_id,
                index,
                payload,
                plaintext_digest: hash_bytes(HashAlgorithm::Sha256, chunk),
            });
        }

        debug!(
            size = plaintext.len(),
            shards = shards.len(),
            shard_size,
            "Encrypted shards"
        );
        Ok(shards)
    }

    /// Decrypt shards and reassemble the plaintext.
    ///
    /// Shards may arrive in any order; they are processed by ascending index
    /// and must cover `0..n` exactly once.
    ///
    /// # Errors
    /// - `Validation` on duplicate or missing indices
    /// - `DecryptionFailed` if any shard fails to authenticate
    /// - `ShardIntegrity` if a decrypted shard does not match its digest
    pub fn decrypt_shards(&self, shards: &[EncryptedShard], password: &str) -> Result<Vec<u8>> {
        let mut ordered: Vec<&EncryptedShard> = shards.iter().collect();
        ordered.sort_by_key(|shard| shard.index);

        for (expected, shard) in ordered.iter().enumerate() {
            if shard.index as usize != expected {
                return Err(Error::Validation(format!(
                    "Shard indices are not contiguous: expected {}, found {}",
                    expected, shard.index
                )));
            }
        }

        let mut plaintext = Vec::new();
        for shard in ordered {
            let chunk = self.decrypt(&shard.payload, password)?;
            if !verify_hash(&chunk, &shard.plaintext_digest, HashAlgorithm::Sha256) {
                return Err(Error::ShardIntegrity { index: shard.index });
            }
            plaintext.extend_from_slice(&chunk);
        }

        Ok(plaintext)
    }
}
