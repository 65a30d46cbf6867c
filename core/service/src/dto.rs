//! Wire types of the encryption service.
//!
//! Field names are camelCase and byte fields are standard base64, matching
//! the JSON the service exchanges with its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use strongbox_common::base64_bytes;
use strongbox_crypto::{EncryptedPayload, EncryptedShard, HashAlgorithm};
use strongbox_geo::{DenialReason, GeoFencingRule, GeoLocation};
use strongbox_timelock::TimelockMode;

/// Encrypt a file under a password.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptRequest {
    #[serde(with = "base64_bytes")]
    pub file_data: Vec<u8>,
    pub password: String,
    #[serde(default)]
    pub key_derivation_iterations: Option<u32>,
    #[serde(default)]
    pub enable_sharding: bool,
    #[serde(default)]
    pub shard_size: Option<usize>,
    /// Accepted for compatibility. No post-quantum primitive is used.
    #[serde(default, alias = "useQuantumSafe")]
    pub quantum_safe: bool,
}

impl EncryptRequest {
    pub fn new(file_data: Vec<u8>, password: impl Into<String>) -> Self {
        Self {
            file_data,
            password: password.into(),
            key_derivation_iterations: None,
            enable_sharding: false,
            shard_size: None,
            quantum_safe: false,
        }
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.key_derivation_iterations = Some(iterations);
        self
    }

    pub fn with_sharding(mut self, shard_size: Option<usize>) -> Self {
        self.enable_sharding = true;
        self.shard_size = shard_size;
        self
    }
}

/// Result of an encryption.
///
/// Exactly one of `encrypted_data` and `encrypted_shards` is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptResponse {
    pub encrypted_data: Option<EncryptedPayload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encrypted_shards: Vec<EncryptedShard>,
    /// Hex SHA-256 of the plaintext.
    pub file_hash: String,
    pub original_size: u64,
    pub encrypted_size: u64,
    pub processing_time_ms: u64,
}

/// Decrypt a payload or a set of shards.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptRequest {
    #[serde(default)]
    pub encrypted_data: Option<EncryptedPayload>,
    #[serde(default)]
    pub encrypted_shards: Vec<EncryptedShard>,
    pub password: String,
}

impl DecryptRequest {
    /// Decrypt whatever an [`EncryptResponse`] produced.
    pub fn from_response(response: &EncryptResponse, password: impl Into<String>) -> Self {
        Self {
            encrypted_data: response.encrypted_data.clone(),
            encrypted_shards: response.encrypted_shards.clone(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptResponse {
    #[serde(with = "base64_bytes")]
    pub file_data: Vec<u8>,
    pub file_hash: String,
    pub size: u64,
    pub from_cache: bool,
}

/// Timelocked encryption.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelockEncryptRequest {
    #[serde(with = "base64_bytes")]
    pub file_data: Vec<u8>,
    pub password: String,
    #[serde(default)]
    pub unlock_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub block_number: Option<u64>,
    pub timelock_type: TimelockMode,
    #[serde(default)]
    pub key_derivation_iterations: Option<u32>,
}

/// Result of a timelocked encryption.
///
/// `timelock_private_key` is the only copy. The service keeps nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelockEncryptResponse {
    pub encrypted_data: EncryptedPayload,
    pub timelock_public_key: String,
    pub timelock_private_key: String,
    pub timelock_encrypted_key: String,
    pub timelock_type: TimelockMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// Timelocked decryption.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelockDecryptRequest {
    pub encrypted_data: EncryptedPayload,
    pub password: String,
    pub timelock_private_key: String,
    pub timelock_encrypted_key: String,
    pub timelock_type: TimelockMode,
    #[serde(default)]
    pub unlock_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub block_number: Option<u64>,
}

impl TimelockDecryptRequest {
    /// Decrypt what a [`TimelockEncryptResponse`] produced.
    pub fn from_response(response: &TimelockEncryptResponse, password: impl Into<String>) -> Self {
        Self {
            encrypted_data: response.encrypted_data.clone(),
            password: password.into(),
            timelock_private_key: response.timelock_private_key.clone(),
            timelock_encrypted_key: response.timelock_encrypted_key.clone(),
            timelock_type: response.timelock_type,
            unlock_at: response.unlock_at,
            block_number: response.block_number,
        }
    }
}

/// Condition to report on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelockStatusRequest {
    pub timelock_type: TimelockMode,
    #[serde(default)]
    pub unlock_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub block_number: Option<u64>,
}

/// Location and rule in one flat object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFenceRequest {
    #[serde(flatten)]
    pub location: GeoLocation,
    #[serde(flatten)]
    pub rule: GeoFencingRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFenceResponse {
    pub is_valid: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialReason>,
}

/// Hash a file on disk or an uploaded buffer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashRequest {
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default, with = "base64_bytes::option")]
    pub file_data: Option<Vec<u8>>,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    /// Files are always streamed; the flag is accepted and ignored.
    #[serde(default)]
    pub is_large_file: bool,
}

impl HashRequest {
    pub fn for_data(data: Vec<u8>, algorithm: HashAlgorithm) -> Self {
        Self {
            file_data: Some(data),
            hash_algorithm: algorithm,
            ..Default::default()
        }
    }

    pub fn for_path(path: impl Into<PathBuf>, algorithm: HashAlgorithm) -> Self {
        Self {
            file_path: Some(path.into()),
            hash_algorithm: algorithm,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashResponse {
    pub success: bool,
    pub hash: String,
    pub algorithm: HashAlgorithm,
    pub file_size: u64,
    /// Milliseconds spent hashing.
    #[serde(rename = "hashTime")]
    pub hash_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl HashResponse {
    pub(crate) fn failed(algorithm: HashAlgorithm, message: impl Into<String>) -> Self {
        Self {
            success: false,
            hash: String::new(),
            algorithm,
            file_size: 0,
            hash_time_ms: 0,
            error_message: Some(message.into()),
        }
    }
}

/// Check a file or buffer against an expected digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyHashRequest {
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default, with = "base64_bytes::option")]
    pub file_data: Option<Vec<u8>>,
    pub expected_hash: String,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
}

/// Distributed backup.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
    #[serde(with = "base64_bytes")]
    pub file_data: Vec<u8>,
    pub file_name: String,
    pub encryption_key: String,
    #[serde(default)]
    pub shard_size: Option<usize>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub replication_factor: Option<u32>,
}

impl BackupRequest {
    pub fn new(
        file_data: Vec<u8>,
        file_name: impl Into<String>,
        encryption_key: impl Into<String>,
    ) -> Self {
        Self {
            file_data,
            file_name: file_name.into(),
            encryption_key: encryption_key.into(),
            shard_size: None,
            expires_at: None,
            replication_factor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResponse {
    pub success: bool,
    /// Address of the manifest.
    pub dht_hash: String,
    pub content_hashes: Vec<String>,
    pub shard_count: u32,
    pub total_size: u64,
    pub estimated_nodes: usize,
}

/// Restore a distributed backup.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    /// Address of the manifest.
    pub content_hash: String,
    pub file_name: String,
    pub encryption_key: String,
}
