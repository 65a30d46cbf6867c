//! Local filesystem content store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::provider::{content_address, ContentStore, ObjectStat};
use strongbox_common::{Error, Result};

/// Local filesystem content store.
///
/// Stores each object as a file named by its content address in a single
/// directory.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `root`. Fails if `root`
    /// exists and is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        } else if !root.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Store root is not a directory: {}",
                root.display()
            )));
        }

        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an address to its file, rejecting anything that is not hex.
    fn object_path(&self, address: &str) -> Result<PathBuf> {
        if address.is_empty() || !address.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidInput(format!(
                "Invalid content address: {}",
                address
            )));
        }
        Ok(self.root.join(address.to_ascii_lowercase()))
    }
}

#[async_trait]
impl ContentStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn add(&self, data: Vec<u8>) -> Result<String> {
        let address = content_address(&data);
        let path = self.object_path(&address)?;

        if fs::try_exists(&path).await? {
            return Ok(address);
        }

        // Write then rename so readers never observe a partial object.
        let tmp = self.root.join(format!(".{}.{}.tmp", address, Uuid::new_v4()));
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &path).await?;

        debug!(address = %address, size = data.len(), "Stored object");
        Ok(address)
    }

    async fn cat(&self, address: &str) -> Result<Vec<u8>> {
        let path = self.object_path(address)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", address)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stat(&self, address: &str) -> Result<Option<ObjectStat>> {
        let path = self.object_path(address)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                let stored_at: Option<DateTime<Utc>> = meta.modified().ok().map(Into::into);
                Ok(Some(ObjectStat {
                    address: address.to_string(),
                    size: meta.len(),
                    stored_at,
                }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, address: &str) -> Result<()> {
        let path = self.object_path(address)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", address)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_add_cat() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path()).unwrap();

        let address = store.add(b"Hello, World!".to_vec()).await.unwrap();
        assert!(temp.path().join(&address).exists());
        assert_eq!(store.cat(&address).await.unwrap(), b"Hello, World!");
    }

    #[tokio::test]
    async fn test_creates_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested").join("store");
        let store = LocalStore::new(&root).unwrap();

        store.add(vec![1]).await.unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_stat_remove() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path()).unwrap();
        let address = store.add(vec![7u8; 33]).await.unwrap();

        assert_eq!(store.stat(&address).await.unwrap().unwrap().size, 33);

        store.remove(&address).await.unwrap();
        assert!(store.stat(&address).await.unwrap().is_none());
        assert!(matches!(store.cat(&address).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_path_like_addresses() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path()).unwrap();

        assert!(matches!(
            store.cat("../etc/passwd").await,
            Err(Error::InvalidInput(_))
        ));
    }
}
