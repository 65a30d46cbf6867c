//! Content store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use strongbox_common::Result;
use strongbox_crypto::{hash_bytes, HashAlgorithm};

/// Metadata for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStat {
    /// Content address of the object.
    pub address: String,
    /// Size in bytes.
    pub size: u64,
    /// When the object was stored, if the backend tracks it.
    pub stored_at: Option<DateTime<Utc>>,
}

/// Shared handle to a content store.
pub type SharedStore = Arc<dyn ContentStore>;

/// Content address used by the memory and local stores (hex SHA-256).
pub fn content_address(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data)
}

/// Content-addressed object store.
///
/// Objects are immutable: the address is a function of the bytes, so adding
/// the same content twice yields the same address.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local", "ipfs").
    fn name(&self) -> &str;

    /// Store an object.
    ///
    /// # Postconditions
    /// - Returns the content address of `data`
    /// - `cat(address)` returns `data`
    ///
    /// # Errors
    /// - Network/I/O errors
    async fn add(&self, data: Vec<u8>) -> Result<String>;

    /// Fetch an object by address.
    ///
    /// # Errors
    /// - `NotFound` if the store does not hold the object
    /// - Network/I/O errors
    async fn cat(&self, address: &str) -> Result<Vec<u8>>;

    /// Get metadata for an object, `None` if it is not held.
    async fn stat(&self, address: &str) -> Result<Option<ObjectStat>>;

    /// Remove (or unpin) an object.
    async fn remove(&self, address: &str) -> Result<()>;

    /// Check if an object is held.
    async fn exists(&self, address: &str) -> Result<bool> {
        Ok(self.stat(address).await?.is_some())
    }
}
