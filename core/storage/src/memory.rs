//! In-memory content store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::provider::{content_address, ContentStore, ObjectStat};
use strongbox_common::{Error, Result};

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    stored_at: DateTime<Utc>,
}

/// In-memory content store.
///
/// Useful for testing and development. All data is stored in memory and lost
/// on drop. Clones share the same objects. The store can be switched offline
/// to simulate an unreachable node.
#[derive(Clone)]
pub struct MemoryStore {
    name: String,
    objects: Arc<RwLock<HashMap<String, Entry>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::with_name("memory")
    }

    /// Create a new empty store reporting `name`.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every operation fail with a network error (or recover).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop an object without going through the trait, simulating loss.
    pub fn lose(&self, address: &str) -> bool {
        self.write().remove(address).is_some()
    }

    /// Number of objects held.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network(format!("Store '{}' is offline", self.name)));
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.objects.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.objects.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self, data: Vec<u8>) -> Result<String> {
        self.check_online()?;
        let address = content_address(&data);

        self.write().entry(address.clone()).or_insert_with(|| Entry {
            data,
            stored_at: Utc::now(),
        });

        Ok(address)
    }

    async fn cat(&self, address: &str) -> Result<Vec<u8>> {
        self.check_online()?;
        self.read()
            .get(address)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", address)))
    }

    async fn stat(&self, address: &str) -> Result<Option<ObjectStat>> {
        self.check_online()?;
        Ok(self.read().get(address).map(|entry| ObjectStat {
            address: address.to_string(),
            size: entry.data.len() as u64,
            stored_at: Some(entry.stored_at),
        }))
    }

    async fn remove(&self, address: &str) -> Result<()> {
        self.check_online()?;
        match self.write().remove(address) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("Object not found: {}", address))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_cat() {
        let store = MemoryStore::new();
        let data = b"Hello, World!".to_vec();

        let address = store.add(data.clone()).await.unwrap();
        assert_eq!(address, content_address(&data));
        assert_eq!(store.cat(&address).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.add(vec![1, 2, 3]).await.unwrap();
        let b = store.add(vec![1, 2, 3]).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_stat_and_exists() {
        let store = MemoryStore::new();
        assert!(!store.exists("missing").await.unwrap());

        let address = store.add(vec![0u8; 10]).await.unwrap();
        let stat = store.stat(&address).await.unwrap().unwrap();
        assert_eq!(stat.size, 10);
        assert!(store.exists(&address).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::new();
        let address = store.add(vec![1]).await.unwrap();

        store.remove(&address).await.unwrap();
        assert!(matches!(store.cat(&address).await, Err(Error::NotFound(_))));
        assert!(matches!(store.remove(&address).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_offline_and_loss() {
        let store = MemoryStore::with_name("node-a");
        let address = store.add(vec![9, 9]).await.unwrap();

        store.set_offline(true);
        assert!(matches!(store.cat(&address).await, Err(Error::Network(_))));
        store.set_offline(false);

        let clone = store.clone();
        assert!(clone.lose(&address));
        assert!(!store.exists(&address).await.unwrap());
        assert_eq!(store.name(), "node-a");
    }
}
