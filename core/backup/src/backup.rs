//! Backup, restore and health checks over content-addressed stores.

use chrono::{DateTime, Utc};
use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::manifest::{DarknetManifest, SealedShardKeys, ShardEntry, MANIFEST_VERSION};
use strongbox_common::{with_timeout, Error, Result};
use strongbox_crypto::aead::{self, AeadAlgorithm};
use strongbox_crypto::hash::digest_matches;
use strongbox_crypto::rng::random_array;
use strongbox_crypto::{
    hash_bytes, FileKey, HashAlgorithm, KdfParams, SharedRandom, DEFAULT_SHARD_SIZE,
};
use strongbox_storage::SharedStore;

/// Default number of replica nodes that receive the manifest.
pub const DEFAULT_REPLICATION_FACTOR: u32 = 3;

/// Default per-node timeout for uploads, fetches and replication.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(10);

/// Share of shards that must be fetchable for a backup to count as healthy,
/// as a fraction `HEALTHY_NUMERATOR / HEALTHY_DENOMINATOR` (80%).
const HEALTHY_NUMERATOR: usize = 4;
const HEALTHY_DENOMINATOR: usize = 5;

/// Options for a single backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOptions {
    pub shard_size: usize,
    pub replication_factor: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            shard_size: DEFAULT_SHARD_SIZE,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            expires_at: None,
        }
    }
}

/// What a successful backup produced.
#[derive(Debug, Clone)]
pub struct BackupReceipt {
    /// Content address of the published manifest.
    pub dht_hash: String,
    pub manifest: DarknetManifest,
    /// Replica nodes that accepted the manifest.
    pub replicated_to: usize,
}

impl BackupReceipt {
    pub fn content_hashes(&self) -> Vec<String> {
        self.manifest.content_hashes()
    }

    pub fn shard_count(&self) -> u32 {
        self.manifest.shard_count
    }

    pub fn total_size(&self) -> u64 {
        self.manifest.original_size
    }

    /// Primary store plus every replica that took the manifest.
    pub fn estimated_nodes(&self) -> usize {
        1 + self.replicated_to
    }
}

/// Availability of a backup's shards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    pub exists: bool,
    pub available_shards: usize,
    pub total_shards: usize,
    pub health_percentage: f64,
    pub healthy: bool,
    pub expired: bool,
}

impl BackupStatus {
    fn missing() -> Self {
        Self {
            exists: false,
            available_shards: 0,
            total_shards: 0,
            health_percentage: 0.0,
            healthy: false,
            expired: false,
        }
    }
}

/// Distributed backup over a primary store and optional replica nodes.
///
/// Shards are encrypted with ChaCha20-Poly1305 under fresh per-shard keys
/// and uploaded to the primary store. The manifest goes to the primary and
/// is then copied to replicas; replica failures are logged and ignored.
pub struct DarknetBackup {
    store: SharedStore,
    replicas: Vec<SharedStore>,
    rng: SharedRandom,
    kdf: KdfParams,
    node_timeout: Duration,
}

impl DarknetBackup {
    pub fn new(store: SharedStore, rng: SharedRandom) -> Self {
        Self {
            store,
            replicas: Vec::new(),
            rng,
            kdf: KdfParams::default(),
            node_timeout: DEFAULT_NODE_TIMEOUT,
        }
    }

    pub fn with_replicas(mut self, replicas: Vec<SharedStore>) -> Self {
        self.replicas = replicas;
        self
    }

    /// Key derivation parameters for sealing shard keys.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    fn shard_aad(backup_id: &Uuid, index: u32) -> Vec<u8> {
        format!("strongbox:shard:v1:{}:{}", backup_id, index).into_bytes()
    }

    /// Shard, encrypt and upload `data`, then publish and replicate the
    /// manifest.
    ///
    /// # Errors
    /// - `Validation` on empty data or name, zero shard size, or an expiry
    ///   in the past
    /// - `KeyDerivation` on an empty encryption key
    /// - Store errors if a shard or the manifest cannot reach the primary
    pub async fn backup(
        &self,
        data: &[u8],
        file_name: &str,
        encryption_key: &str,
        options: &BackupOptions,
    ) -> Result<BackupReceipt> {
        if data.is_empty() {
            return Err(Error::Validation("Backup data cannot be empty".to_string()));
        }
        if file_name.trim().is_empty() {
            return Err(Error::Validation("File name cannot be empty".to_string()));
        }
        if options.shard_size == 0 {
            return Err(Error::Validation("Shard size must be positive".to_string()));
        }
        if options.expires_at.is_some_and(|at| at <= Utc::now()) {
            return Err(Error::Validation("Expiry must be in the future".to_string()));
        }

        let rng = self.rng.as_ref();
        let backup_id = uuid::Builder::from_random_bytes(random_array(rng)).into_uuid();
        let algorithm = AeadAlgorithm::ChaCha20Poly1305;

        let mut keys = Vec::new();
        let mut objects = Vec::new();
        let mut pending = Vec::new();
        for (i, chunk) in data.chunks(options.shard_size).enumerate() {
            let index = i as u32;
            let key = FileKey::generate(rng);
            objects.push(aead::encrypt(
                algorithm,
                key.as_bytes(),
                chunk,
                &Self::shard_aad(&backup_id, index),
                rng,
            )?);
            pending.push((index, chunk.len() as u64, hash_bytes(HashAlgorithm::Sha256, chunk)));
            keys.push(key);
        }
        let sealed_keys =
            SealedShardKeys::seal(&keys, encryption_key, &self.kdf, &backup_id, rng)?;

        let addresses = try_join_all(objects.into_iter().map(|object| {
            with_timeout(self.node_timeout, "shard upload", self.store.add(object))
        }))
        .await?;

        let shards: Vec<ShardEntry> = pending
            .into_iter()
            .zip(addresses)
            .map(|((index, size, digest), address)| ShardEntry {
                index,
                address,
                size,
                plaintext_sha256: digest,
            })
            .collect();

        let manifest = DarknetManifest {
            version: MANIFEST_VERSION,
            backup_id,
            file_name: file_name.to_string(),
            original_size: data.len() as u64,
            shard_count: shards.len() as u32,
            shard_size: options.shard_size as u64,
            shards,
            algorithm,
            created_at: Utc::now(),
            expires_at: options.expires_at,
            replication_factor: options.replication_factor,
            sealed_keys,
        };

        let manifest_bytes = manifest.to_bytes()?;
        let dht_hash = with_timeout(
            self.node_timeout,
            "manifest publish",
            self.store.add(manifest_bytes.clone()),
        )
        .await?;

        let replicated_to = self
            .replicate(&dht_hash, manifest_bytes, options.replication_factor)
            .await;

        info!(
            backup_id = %backup_id,
            store = self.store.name(),
            shards = manifest.shard_count,
            size = manifest.original_size,
            replicated_to,
            "Backup published"
        );

        Ok(BackupReceipt {
            dht_hash,
            manifest,
            replicated_to,
        })
    }

    async fn replicate(&self, dht_hash: &str, manifest: Vec<u8>, factor: u32) -> usize {
        let targets: Vec<&SharedStore> = self.replicas.iter().take(factor as usize).collect();
        if targets.len() < factor as usize {
            debug!(
                requested = factor,
                available = targets.len(),
                "Fewer replica nodes than requested"
            );
        }

        let results = join_all(targets.iter().map(|replica| {
            with_timeout(
                self.node_timeout,
                "manifest replication",
                replica.add(manifest.clone()),
            )
        }))
        .await;

        let mut succeeded = 0;
        for (replica, result) in targets.iter().zip(results) {
            match result {
                Ok(address) => {
                    if address != dht_hash {
                        warn!(
                            node = replica.name(),
                            %address,
                            "Replica stored manifest under a different address"
                        );
                    }
                    succeeded += 1;
                }
                Err(e) => warn!(node = replica.name(), error = %e, "Manifest replication failed"),
            }
        }
        succeeded
    }

    /// Fetch a manifest from the primary, falling back to replicas.
    pub async fn fetch_manifest(&self, address: &str) -> Result<DarknetManifest> {
        let mut last_error = Error::NotFound(format!("Manifest {} not found", address));
        for store in std::iter::once(&self.store).chain(self.replicas.iter()) {
            match with_timeout(self.node_timeout, "manifest fetch", store.cat(address)).await {
                Ok(bytes) => return DarknetManifest::from_bytes(&bytes),
                Err(e) => {
                    debug!(node = store.name(), error = %e, "Manifest fetch failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Fetch, decrypt and reassemble a backup.
    ///
    /// # Errors
    /// - `NotFound` if the manifest is missing, expired, or names another file
    /// - `DecryptionFailed` on a wrong encryption key
    /// - `MissingShards` if any shard cannot be fetched
    /// - `ShardIntegrity` if a shard fails authentication or its digest
    pub async fn restore(
        &self,
        manifest_address: &str,
        file_name: &str,
        encryption_key: &str,
    ) -> Result<Vec<u8>> {
        let manifest = self.fetch_manifest(manifest_address).await?;
        if manifest.file_name != file_name {
            return Err(Error::NotFound(format!("No backup of '{}' at {}", file_name, manifest_address)));
        }
        if manifest.is_expired(Utc::now()) {
            return Err(Error::NotFound(format!("Backup at {} has expired", manifest_address)));
        }

        let keys = manifest.sealed_keys.open(
            encryption_key,
            &manifest.backup_id,
            manifest.shard_count,
        )?;

        let fetched = join_all(manifest.shards.iter().map(|shard| {
            with_timeout(self.node_timeout, "shard fetch", self.store.cat(&shard.address))
        }))
        .await;

        let required = manifest.shards.len();
        let objects: Vec<Vec<u8>> = fetched
            .into_iter()
            .zip(&manifest.shards)
            .filter_map(|(result, shard)| match result {
                Ok(object) => Some(object),
                Err(e) => {
                    warn!(index = shard.index, address = %shard.address, error = %e, "Shard unavailable");
                    None
                }
            })
            .collect();
        if objects.len() < required {
            return Err(Error::MissingShards {
                available: objects.len(),
                required,
            });
        }

        // Size from what was actually fetched; the manifest is untrusted.
        let mut plaintext = Vec::with_capacity(objects.iter().map(Vec::len).sum());
        for ((shard, object), key) in manifest.shards.iter().zip(&objects).zip(&keys) {
            let chunk = aead::decrypt(
                manifest.algorithm,
                key.as_bytes(),
                object,
                &Self::shard_aad(&manifest.backup_id, shard.index),
            )
            .map_err(|_| Error::ShardIntegrity { index: shard.index })?;

            if !digest_matches(&hash_bytes(HashAlgorithm::Sha256, &chunk), &shard.plaintext_sha256) {
                return Err(Error::ShardIntegrity { index: shard.index });
            }
            plaintext.extend_from_slice(&chunk);
        }

        if plaintext.len() as u64 != manifest.original_size {
            return Err(Error::Validation(format!(
                "Restored {} bytes, manifest records {}",
                plaintext.len(),
                manifest.original_size
            )));
        }

        info!(
            backup_id = %manifest.backup_id,
            shards = required,
            size = plaintext.len(),
            "Backup restored"
        );
        Ok(plaintext)
    }

    /// Report how many of a backup's shards can still be fetched.
    pub async fn status(&self, manifest_address: &str) -> BackupStatus {
        let manifest = match self.fetch_manifest(manifest_address).await {
            Ok(manifest) => manifest,
            Err(e) => {
                debug!(address = manifest_address, error = %e, "Backup manifest unavailable");
                return BackupStatus::missing();
            }
        };

        let stats = join_all(manifest.shards.iter().map(|shard| {
            with_timeout(self.node_timeout, "shard stat", self.store.stat(&shard.address))
        }))
        .await;

        let total = manifest.shards.len();
        let available = stats
            .into_iter()
            .filter(|result| matches!(result, Ok(Some(_))))
            .count();

        let health_percentage = if total == 0 {
            100.0
        } else {
            available as f64 * 100.0 / total as f64
        };

        BackupStatus {
            exists: true,
            available_shards: available,
            total_shards: total,
            health_percentage,
            healthy: available * HEALTHY_DENOMINATOR >= total * HEALTHY_NUMERATOR,
            expired: manifest.is_expired(Utc::now()),
        }
    }

    /// Whether at least 80% of a backup's shards can be fetched.
    pub async fn verify_integrity(&self, manifest_address: &str) -> bool {
        let status = self.status(manifest_address).await;
        status.exists && status.healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use strongbox_crypto::SeededRandom;
    use strongbox_storage::{ContentStore, MemoryStore, ObjectStat};

    fn backup_over(store: &MemoryStore) -> DarknetBackup {
        DarknetBackup::new(Arc::new(store.clone()), SeededRandom::shared(11))
            .with_kdf(KdfParams::new(10_000).unwrap())
    }

    fn options(shard_size: usize) -> BackupOptions {
        BackupOptions {
            shard_size,
            ..Default::default()
        }
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_backup_restore_roundtrip() {
        let store = MemoryStore::new();
        let backup = backup_over(&store);
        let original = data(10_000);

        let receipt = backup
            .backup(&original, "report.pdf", "secret", &options(1_000))
            .await
            .unwrap();
        assert_eq!(receipt.shard_count(), 10);
        assert_eq!(receipt.content_hashes().len(), 10);
        assert_eq!(receipt.total_size(), 10_000);
        assert_eq!(receipt.estimated_nodes(), 1);
        assert_eq!(store.len(), 11);

        let restored = backup
            .restore(&receipt.dht_hash, "report.pdf", "secret")
            .await
            .unwrap();
        assert_eq!(restored, original);
    }

    #[tokio::test]
    async fn test_uneven_last_shard() {
        let store = MemoryStore::new();
        let backup = backup_over(&store);
        let original = data(2_500);

        let receipt = backup
            .backup(&original, "f", "k", &options(1_000))
            .await
            .unwrap();
        assert_eq!(receipt.manifest.shards[2].size, 500);
        assert_eq!(backup.restore(&receipt.dht_hash, "f", "k").await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_health_threshold() {
        let store = MemoryStore::new();
        let backup = backup_over(&store);
        let receipt = backup
            .backup(&data(10_000), "f", "k", &options(1_000))
            .await
            .unwrap();
        let addresses = receipt.content_hashes();

        assert!(backup.verify_integrity(&receipt.dht_hash).await);

        store.lose(&addresses[0]);
        store.lose(&addresses[1]);
        let status = backup.status(&receipt.dht_hash).await;
        assert_eq!(status.available_shards, 8);
        assert_eq!(status.total_shards, 10);
        assert_eq!(status.health_percentage, 80.0);
        assert!(status.healthy);
        assert!(backup.verify_integrity(&receipt.dht_hash).await);

        store.lose(&addresses[2]);
        assert!(!backup.verify_integrity(&receipt.dht_hash).await);
    }

    #[tokio::test]
    async fn test_restore_with_lost_shard_reports_missing() {
        let store = MemoryStore::new();
        let backup = backup_over(&store);
        let receipt = backup
            .backup(&data(5_000), "f", "k", &options(1_000))
            .await
            .unwrap();

        store.lose(&receipt.content_hashes()[3]);
        match backup.restore(&receipt.dht_hash, "f", "k").await {
            Err(Error::MissingShards {
                available,
                required,
            }) => {
                assert_eq!(available, 4);
                assert_eq!(required, 5);
            }
            other => panic!("unexpected result: {:?}", other.map(|d| d.len())),
        }
    }

    #[tokio::test]
    async fn test_restore_checks_name_key_and_expiry() {
        let store = MemoryStore::new();
        let backup = backup_over(&store);
        let receipt = backup
            .backup(&data(100), "f", "k", &options(64))
            .await
            .unwrap();

        assert!(matches!(
            backup.restore(&receipt.dht_hash, "g", "k").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            backup.restore(&receipt.dht_hash, "f", "wrong").await,
            Err(Error::DecryptionFailed)
        ));
        assert!(matches!(
            backup.restore("deadbeef", "f", "k").await,
            Err(Error::NotFound(_))
        ));

        let mut expired = receipt.manifest.clone();
        expired.expires_at = Some(Utc::now() - ChronoDuration::hours(1));
        let address = store.add(expired.to_bytes().unwrap()).await.unwrap();
        assert!(matches!(
            backup.restore(&address, "f", "k").await,
            Err(Error::NotFound(_))
        ));
        assert!(backup.status(&address).await.expired);
    }

    #[tokio::test]
    async fn test_swapped_shards_fail_integrity() {
        let store = MemoryStore::new();
        let backup = backup_over(&store);
        let receipt = backup
            .backup(&data(2_000), "f", "k", &options(1_000))
            .await
            .unwrap();

        let mut swapped = receipt.manifest.clone();
        let first = swapped.shards[0].address.clone();
        swapped.shards[0].address = swapped.shards[1].address.clone();
        swapped.shards[1].address = first;
        let address = store.add(swapped.to_bytes().unwrap()).await.unwrap();

        assert!(matches!(
            backup.restore(&address, "f", "k").await,
            Err(Error::ShardIntegrity { index: 0 })
        ));
    }

    #[tokio::test]
    async fn test_inflated_manifest_size_is_rejected() {
        let store = MemoryStore::new();
        let backup = backup_over(&store);
        let receipt = backup
            .backup(&data(2_000), "f", "k", &options(1_000))
            .await
            .unwrap();

        let mut inflated = receipt.manifest.clone();
        inflated.original_size = u64::MAX;
        let address = store.add(inflated.to_bytes().unwrap()).await.unwrap();

        assert!(matches!(
            backup.restore(&address, "f", "k").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let store = MemoryStore::new();
        let backup = backup_over(&store);

        assert!(matches!(
            backup.backup(b"", "f", "k", &options(10)).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            backup.backup(b"x", "f", "k", &options(0)).await,
            Err(Error::Validation(_))
        ));
        let past = BackupOptions {
            expires_at: Some(Utc::now() - ChronoDuration::seconds(1)),
            ..options(10)
        };
        assert!(matches!(
            backup.backup(b"x", "f", "k", &past).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            backup.backup(b"x", "f", "", &options(10)).await,
            Err(Error::KeyDerivation(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_replication_is_best_effort() {
        let primary = MemoryStore::with_name("primary");
        let good = MemoryStore::with_name("replica-a");
        let down = MemoryStore::with_name("replica-b");
        down.set_offline(true);
        let unused = MemoryStore::with_name("replica-c");

        let backup = backup_over(&primary).with_replicas(vec![
            Arc::new(good.clone()),
            Arc::new(down.clone()),
            Arc::new(unused.clone()),
        ]);
        let opts = BackupOptions {
            replication_factor: 2,
            ..options(1_000)
        };

        let receipt = backup.backup(&data(3_000), "f", "k", &opts).await.unwrap();
        assert_eq!(receipt.replicated_to, 1);
        assert_eq!(receipt.estimated_nodes(), 2);
        assert_eq!(good.len(), 1);
        assert!(unused.is_empty());

        // The manifest survives loss on the primary through the replica.
        primary.lose(&receipt.dht_hash);
        assert!(backup.status(&receipt.dht_hash).await.exists);
    }

    struct Stuck;

    #[async_trait]
    impl ContentStore for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn add(&self, _data: Vec<u8>) -> Result<String> {
            std::future::pending().await
        }

        async fn cat(&self, _address: &str) -> Result<Vec<u8>> {
            std::future::pending().await
        }

        async fn stat(&self, _address: &str) -> Result<Option<ObjectStat>> {
            std::future::pending().await
        }

        async fn remove(&self, _address: &str) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_replica_does_not_block_backup() {
        let primary = MemoryStore::new();
        let backup = backup_over(&primary)
            .with_replicas(vec![Arc::new(Stuck)])
            .with_node_timeout(Duration::from_millis(100));

        let receipt = backup
            .backup(&data(100), "f", "k", &options(50))
            .await
            .unwrap();
        assert_eq!(receipt.replicated_to, 0);
    }
}
