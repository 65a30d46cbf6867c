//! Encryption service boundary for Strongbox.
//!
//! [`EncryptionService`] validates wire requests and drives the core crates:
//! password encryption (whole or sharded), timelocks, geo-fencing, hashing
//! and integrity records, distributed backup, and account password hashing.
//! CPU-heavy work runs on Tokio's blocking pool.
//!
//! Decrypt results may be served from a bounded, expiring cache keyed by a
//! MAC of the ciphertext digest and password. The password itself is never
//! stored.

pub mod cache;
pub mod config;
pub mod dto;
pub mod service;

pub use cache::DecryptCache;
pub use config::{
    BackupConfig, CacheConfig, ChainConfig, GeoConfig, KdfConfig, LimitsConfig, ServiceConfig,
};
pub use dto::*;
pub use service::{EncryptionService, ServiceComponents};
