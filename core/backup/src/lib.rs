//! Distributed backup for Strongbox.
//!
//! A backup splits a file into contiguous shards, encrypts each under its
//! own random key and stores the results in a content-addressed store. A
//! [`DarknetManifest`] lists the shard addresses and is published to the
//! same store, then copied to replica nodes. The manifest address is all a
//! restorer needs besides the encryption key.
//!
//! There is no erasure coding: every shard is needed to restore. Health is
//! reported as the share of shards still fetchable, with 80% counted as
//! healthy.

pub mod backup;
pub mod manifest;

pub use backup::{
    BackupOptions, BackupReceipt, BackupStatus, DarknetBackup, DEFAULT_NODE_TIMEOUT,
    DEFAULT_REPLICATION_FACTOR,
};
pub use manifest::{DarknetManifest, SealedShardKeys, ShardEntry, MANIFEST_VERSION};
