//! Cryptographic core for Strongbox.
//!
//! This module provides:
//! - An injectable randomness source
//! - Password-based key derivation (PBKDF2-HMAC-SHA256) and bcrypt password hashing
//! - Authenticated encryption (AES-256-GCM, ChaCha20-Poly1305)
//! - Whole-file and sharded file encryption
//! - File hashing and integrity records
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Wrong password and tampered ciphertext surface as the same error

pub mod aead;
pub mod file;
pub mod hash;
pub mod integrity;
pub mod kdf;
pub mod keys;
pub mod rng;
pub mod shard;

pub use aead::{AeadAlgorithm, NONCE_SIZE, TAG_SIZE};
pub use file::{
    EncryptOptions, EncryptedPayload, FileEncryptor, KdfAlgorithm, DEFAULT_SHARD_SIZE,
};
pub use hash::{
    hash_bytes, hash_bytes_report, hash_file, hash_reader, verify_file_hash, verify_hash,
    HashAlgorithm, HashReport,
};
pub use integrity::{verify_integrity, IntegrityFailure, IntegrityRecord, IntegrityVerdict};
pub use kdf::{
    bind_key, derive_biometric_key, derive_key, hash_password, verify_password, KdfParams,
};
pub use keys::{DerivedKey, FileKey, Salt, KEY_LENGTH};
pub use rng::{os_random, OsRandom, RandomSource, SeededRandom, SharedRandom};
pub use shard::{shard_count, EncryptedShard};
