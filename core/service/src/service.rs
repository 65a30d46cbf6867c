//! The encryption service: request validation and orchestration over the
//! core crates.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cache::DecryptCache;
use crate::config::ServiceConfig;
use crate::dto::{
    BackupRequest, BackupResponse, DecryptRequest, DecryptResponse, EncryptRequest,
    EncryptResponse, GeoFenceRequest, GeoFenceResponse, HashRequest, HashResponse,
    RestoreRequest, TimelockDecryptRequest, TimelockEncryptRequest, TimelockEncryptResponse,
    TimelockStatusRequest, VerifyHashRequest,
};
use strongbox_backup::{BackupOptions, BackupStatus, DarknetBackup};
use strongbox_chain::{FixedOracle, GuardedOracle, JsonRpcConfig, JsonRpcOracle, SharedOracle};
use strongbox_common::{Error, Result};
use strongbox_crypto::{
    self as crypto, EncryptOptions, EncryptedPayload, EncryptedShard, FileEncryptor,
    HashAlgorithm, IntegrityRecord, IntegrityVerdict, KdfParams, SharedRandom,
};
use strongbox_geo::{GeoFencer, HttpLocationResolver, HttpResolverConfig, SharedResolver};
use strongbox_storage::{create_default_registry, SharedStore};
use strongbox_timelock::{
    EscrowedKey, SharedClock, SystemClock, TimelockArtifact, TimelockCondition, TimelockEngine,
    TimelockPrivateKey, TimelockStatus,
};

/// Collaborators the service is built over.
pub struct ServiceComponents {
    pub rng: SharedRandom,
    pub oracle: SharedOracle,
    pub clock: SharedClock,
    pub resolver: Option<SharedResolver>,
    pub store: SharedStore,
    pub replicas: Vec<SharedStore>,
}

impl ServiceComponents {
    /// Build production collaborators from configuration.
    ///
    /// # Errors
    /// - `InvalidInput` if a store cannot be resolved
    /// - Errors building the HTTP clients
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let oracle: SharedOracle = match &config.chain.rpc_url {
            Some(rpc_url) => {
                let rpc = JsonRpcOracle::new(JsonRpcConfig {
                    rpc_url: rpc_url.clone(),
                    timeout_secs: config.chain.timeout_secs,
                })?;
                GuardedOracle::shared(Arc::new(rpc), config.chain.timeout(), config.chain.retry())
            }
            None => {
                warn!("No chain RPC configured; block-height timelocks will stay locked");
                Arc::new(FixedOracle::new(0))
            }
        };

        let resolver: Option<SharedResolver> = if config.geo.resolver_enabled {
            let resolver = HttpLocationResolver::new(HttpResolverConfig {
                ip_api_url: config.geo.ip_api_url.clone(),
                reverse_geocode_url: config.geo.reverse_geocode_url.clone(),
                timeout_secs: config.geo.timeout_secs,
            })?;
            Some(Arc::new(resolver))
        } else {
            None
        };

        let registry = create_default_registry();
        let store = registry.resolve_spec(&config.backup.store)?;
        let replicas = config
            .backup
            .replicas
            .iter()
            .map(|spec| registry.resolve_spec(spec))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rng: crypto::os_random(),
            oracle,
            clock: Arc::new(SystemClock),
            resolver,
            store,
            replicas,
        })
    }
}

enum Ciphertext {
    Whole(EncryptedPayload),
    Shards(Vec<EncryptedShard>),
}

impl Ciphertext {
    fn digest(&self) -> Result<Vec<u8>> {
        let encoded = match self {
            Self::Whole(payload) => serde_json::to_vec(payload)?,
            Self::Shards(shards) => serde_json::to_vec(shards)?,
        };
        Ok(crypto::hash_bytes(HashAlgorithm::Sha256, &encoded).into_bytes())
    }
}

/// Run CPU-bound work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Crypto(format!("Worker task failed: {}", e)))?
}

fn sha256_hex(data: &[u8]) -> String {
    crypto::hash_bytes(HashAlgorithm::Sha256, data)
}

/// Encryption service.
///
/// Every operation is independent. The decrypt cache is the only shared
/// mutable state.
pub struct EncryptionService {
    config: ServiceConfig,
    encryptor: FileEncryptor,
    timelock: Arc<TimelockEngine>,
    fencer: GeoFencer,
    backup: DarknetBackup,
    cache: Option<DecryptCache>,
    rng: SharedRandom,
}

impl EncryptionService {
    /// Build the service.
    ///
    /// # Errors
    /// - `Validation` if the configuration is inconsistent
    pub fn new(config: ServiceConfig, components: ServiceComponents) -> Result<Self> {
        config.validate()?;

        let ServiceComponents {
            rng,
            oracle,
            clock,
            resolver,
            store,
            replicas,
        } = components;

        let encryptor = FileEncryptor::new(rng.clone());
        let timelock = TimelockEngine::new(encryptor.clone(), oracle, clock)
            .with_block_interval(Duration::from_secs(config.chain.block_interval_secs));

        let fencer = match resolver {
            Some(resolver) => GeoFencer::new(resolver, config.geo.timeout(), config.geo.retry()),
            None => GeoFencer::offline(),
        };

        let backup = DarknetBackup::new(store, rng.clone())
            .with_replicas(replicas)
            .with_kdf(KdfParams::new(config.kdf.default_iterations)?)
            .with_node_timeout(Duration::from_secs(config.backup.node_timeout_secs));

        let cache = config.cache.enabled.then(|| {
            DecryptCache::new(
                Duration::from_secs(config.cache.ttl_secs),
                config.cache.capacity,
                rng.as_ref(),
            )
        });

        info!(
            cache = config.cache.enabled,
            resolver = config.geo.resolver_enabled,
            "Encryption service ready"
        );

        Ok(Self {
            config,
            encryptor,
            timelock: Arc::new(timelock),
            fencer,
            backup,
            cache,
            rng,
        })
    }

    /// Build the service and its collaborators from configuration.
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        let components = ServiceComponents::from_config(&config)?;
        Self::new(config, components)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn check_data(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::Validation("File data is empty".to_string()));
        }
        let max = self.config.limits.max_file_size;
        if data.len() > max {
            return Err(Error::Validation(format!(
                "File of {} bytes exceeds the {} byte limit",
                data.len(),
                max
            )));
        }
        Ok(())
    }

    fn check_shard_size(&self, shard_size: Option<usize>) -> Result<usize> {
        let limits = &self.config.limits;
        let shard_size = shard_size.unwrap_or(limits.default_shard_size);
        if shard_size < limits.min_shard_size || shard_size > limits.max_file_size {
            return Err(Error::Validation(format!(
                "Shard size must be between {} and {} bytes",
                limits.min_shard_size, limits.max_file_size
            )));
        }
        Ok(shard_size)
    }

    fn options(&self, iterations: Option<u32>) -> Result<EncryptOptions> {
        let kdf = &self.config.kdf;
        let iterations = iterations.unwrap_or(kdf.default_iterations);
        if !(kdf.min_iterations..=kdf.max_iterations).contains(&iterations) {
            return Err(Error::Validation(format!(
                "Key derivation iterations must be between {} and {}",
                kdf.min_iterations, kdf.max_iterations
            )));
        }
        EncryptOptions::default().with_iterations(iterations)
    }

    /// Encrypt a file, whole or sharded.
    ///
    /// # Errors
    /// - `Validation` on empty or oversized data, or out-of-range
    ///   iterations or shard size
    /// - `KeyDerivation` on an empty password
    pub async fn encrypt(&self, request: EncryptRequest) -> Result<EncryptResponse> {
        let started = Instant::now();
        let EncryptRequest {
            file_data,
            password,
            key_derivation_iterations,
            enable_sharding,
            shard_size,
            quantum_safe,
        } = request;
        let password = Zeroizing::new(password);

        self.check_data(&file_data)?;
        if quantum_safe {
            warn!("Quantum-safe encryption requested but not available; using AES-256-GCM");
        }
        let mut options = self.options(key_derivation_iterations)?;
        if enable_sharding {
            options = options.with_sharding(self.check_shard_size(shard_size)?);
        }

        let encryptor = self.encryptor.clone();
        let original_size = file_data.len() as u64;
        let (file_hash, encrypted_data, encrypted_shards) = blocking(move || {
            let file_hash = sha256_hex(&file_data);
            if options.enable_sharding {
                let shards =
                    encryptor.encrypt_shards(&file_data, &password, options.shard_size, &options)?;
                Ok((file_hash, None, shards))
            } else {
                let payload = encryptor.encrypt(&file_data, &password, &options)?;
                Ok((file_hash, Some(payload), Vec::new()))
            }
        })
        .await?;

        let encrypted_size = match &encrypted_data {
            Some(payload) => payload.encrypted_size(),
            None => encrypted_shards
                .iter()
                .map(|shard| shard.payload.encrypted_size())
                .sum(),
        } as u64;

        info!(
            size = original_size,
            encrypted_size,
            shards = encrypted_shards.len(),
            "File encrypted"
        );

        Ok(EncryptResponse {
            encrypted_data,
            encrypted_shards,
            file_hash,
            original_size,
            encrypted_size,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Decrypt a payload or a set of shards, consulting the cache first.
    ///
    /// # Errors
    /// - `Validation` unless exactly one of payload and shards is given
    /// - `DecryptionFailed` on a wrong password or tampered data
    /// - `ShardIntegrity` if a shard's plaintext digest does not match
    pub async fn decrypt(&self, request: DecryptRequest) -> Result<DecryptResponse> {
        let DecryptRequest {
            encrypted_data,
            encrypted_shards,
            password,
        } = request;
        let password = Zeroizing::new(password);

        let input = match (encrypted_data, encrypted_shards.is_empty()) {
            (Some(payload), true) => Ciphertext::Whole(payload),
            (None, false) => Ciphertext::Shards(encrypted_shards),
            _ => {
                return Err(Error::Validation(
                    "Provide either encryptedData or encryptedShards".to_string(),
                ))
            }
        };

        let cache_key = match &self.cache {
            Some(cache) => Some(cache.key(&input.digest()?, &password)),
            None => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(plaintext) = cache.get(key) {
                debug!(size = plaintext.len(), "Decrypt served from cache");
                return Ok(Self::decrypted(plaintext, true));
            }
        }

        let encryptor = self.encryptor.clone();
        let plaintext = blocking(move || match &input {
            Ciphertext::Whole(payload) => encryptor.decrypt(payload, &password),
            Ciphertext::Shards(shards) => encryptor.decrypt_shards(shards, &password),
        })
        .await?;

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, plaintext.clone());
        }

        info!(size = plaintext.len(), "File decrypted");
        Ok(Self::decrypted(plaintext, false))
    }

    fn decrypted(plaintext: Vec<u8>, from_cache: bool) -> DecryptResponse {
        DecryptResponse {
            file_hash: sha256_hex(&plaintext),
            size: plaintext.len() as u64,
            file_data: plaintext,
            from_cache,
        }
    }

    /// Whether `password` opens `payload`. Never fails.
    pub async fn validate_password(&self, password: &str, payload: &EncryptedPayload) -> bool {
        let encryptor = self.encryptor.clone();
        let password = Zeroizing::new(password.to_string());
        let payload = payload.clone();
        blocking(move || Ok(encryptor.validate_password(&password, &payload)))
            .await
            .unwrap_or(false)
    }

    /// Encrypt under a timelock. The private key in the response is the
    /// only copy.
    ///
    /// # Errors
    /// - `Validation` on bad data, iterations, or a condition missing a field
    pub async fn timelock_encrypt(
        &self,
        request: TimelockEncryptRequest,
    ) -> Result<TimelockEncryptResponse> {
        let TimelockEncryptRequest {
            file_data,
            password,
            unlock_at,
            block_number,
            timelock_type,
            key_derivation_iterations,
        } = request;
        let password = Zeroizing::new(password);

        self.check_data(&file_data)?;
        let options = self.options(key_derivation_iterations)?;
        let condition = TimelockCondition::from_parts(timelock_type, unlock_at, block_number)?;

        let engine = self.timelock.clone();
        let sealed =
            blocking(move || engine.encrypt(&file_data, &password, condition, &options)).await?;

        Ok(TimelockEncryptResponse {
            timelock_public_key: sealed.artifact.public_key.to_base64(),
            timelock_private_key: sealed.private_key.to_base64(),
            timelock_encrypted_key: sealed.artifact.escrowed_key.to_base64()?,
            timelock_type: sealed.artifact.condition.mode,
            unlock_at: sealed.artifact.condition.unlock_at,
            block_number: sealed.artifact.condition.unlock_height,
            encrypted_data: sealed.artifact.payload,
        })
    }

    /// Decrypt a timelocked file once its condition holds.
    ///
    /// # Errors
    /// - `TimelockNotYetUnlockable` naming the unmet sub-conditions
    /// - `DecryptionFailed` on a wrong password or private key, or a
    ///   condition that differs from the one the file was sealed with
    /// - `InvalidInput` on malformed key encodings
    pub async fn timelock_decrypt(&self, request: TimelockDecryptRequest) -> Result<Vec<u8>> {
        let password = Zeroizing::new(request.password);
        let private_key = TimelockPrivateKey::from_base64(&request.timelock_private_key)?;
        let escrowed_key = EscrowedKey::from_base64(&request.timelock_encrypted_key)?;
        let condition = TimelockCondition::from_parts(
            request.timelock_type,
            request.unlock_at,
            request.block_number,
        )?;

        let artifact = TimelockArtifact {
            payload: request.encrypted_data,
            condition,
            escrowed_key,
            public_key: private_key.public_key(),
        };
        self.timelock.decrypt(&artifact, &password, &private_key).await
    }

    /// Where a timelock condition stands.
    pub async fn timelock_status(&self, request: TimelockStatusRequest) -> Result<TimelockStatus> {
        let condition = TimelockCondition::from_parts(
            request.timelock_type,
            request.unlock_at,
            request.block_number,
        )?;
        Ok(self.timelock.status(&condition).await)
    }

    /// Check a location against a geo-fencing rule. Never fails.
    ///
    /// Country and city always come from the resolver; values asserted by
    /// the caller are dropped.
    pub async fn validate_geofence(&self, request: GeoFenceRequest) -> GeoFenceResponse {
        let GeoFenceRequest { mut location, rule } = request;
        if location.country.is_some() || location.city.is_some() {
            debug!("Ignoring caller-supplied country/city");
            location.country = None;
            location.city = None;
        }
        let verdict = self.fencer.evaluate(&location, &rule).await;
        info!(allowed = verdict.allowed, denial = ?verdict.denial, "Geo-fence evaluated");
        GeoFenceResponse {
            is_valid: verdict.allowed,
            reason: verdict.reason,
            denial: verdict.denial,
        }
    }

    /// Hash a buffer or a file. Failures are reported in the response.
    pub async fn hash(&self, request: HashRequest) -> HashResponse {
        let algorithm = request.hash_algorithm;
        let report = match (request.file_data, request.file_path) {
            (Some(data), _) => {
                blocking(move || Ok(crypto::hash_bytes_report(algorithm, &data))).await
            }
            (None, Some(path)) => crypto::hash_file(&path, algorithm).await,
            (None, None) => {
                return HashResponse::failed(algorithm, "Either filePath or fileData is required")
            }
        };

        match report {
            Ok(report) => {
                debug!(algorithm = %algorithm, size = report.size, "Hashed");
                HashResponse {
                    success: true,
                    hash: report.hash,
                    algorithm,
                    file_size: report.size,
                    hash_time_ms: report.elapsed_ms,
                    error_message: None,
                }
            }
            Err(e) => HashResponse::failed(algorithm, e.to_string()),
        }
    }

    /// Compare a buffer or a file with an expected digest.
    ///
    /// # Errors
    /// - `Validation` if neither data nor path is given
    /// - `NotFound` or `Io` reading the file
    pub async fn verify_hash(&self, request: VerifyHashRequest) -> Result<bool> {
        let algorithm = request.hash_algorithm;
        let expected = request.expected_hash;
        match (request.file_data, request.file_path) {
            (Some(data), _) => {
                blocking(move || Ok(crypto::verify_hash(&data, &expected, algorithm))).await
            }
            (None, Some(path)) => crypto::verify_file_hash(&path, &expected, algorithm).await,
            (None, None) => Err(Error::Validation(
                "Either filePath or fileData is required".to_string(),
            )),
        }
    }

    pub async fn create_integrity_record(
        &self,
        path: impl AsRef<Path>,
        algorithm: HashAlgorithm,
        metadata: BTreeMap<String, String>,
    ) -> Result<IntegrityRecord> {
        IntegrityRecord::create(path, algorithm, metadata).await
    }

    pub async fn verify_integrity(
        &self,
        path: impl AsRef<Path>,
        record: &IntegrityRecord,
    ) -> IntegrityVerdict {
        crypto::verify_integrity(path, record).await
    }

    /// Shard, encrypt and distribute a file.
    ///
    /// # Errors
    /// - `Validation` on bad data, shard size or expiry
    /// - Store errors reaching the primary store
    pub async fn backup(&self, request: BackupRequest) -> Result<BackupResponse> {
        let encryption_key = Zeroizing::new(request.encryption_key);
        self.check_data(&request.file_data)?;
        let options = BackupOptions {
            shard_size: self.check_shard_size(request.shard_size)?,
            replication_factor: request
                .replication_factor
                .unwrap_or(self.config.backup.replication_factor),
            expires_at: request.expires_at,
        };

        let receipt = self
            .backup
            .backup(&request.file_data, &request.file_name, &encryption_key, &options)
            .await?;

        Ok(BackupResponse {
            success: true,
            content_hashes: receipt.content_hashes(),
            shard_count: receipt.shard_count(),
            total_size: receipt.total_size(),
            estimated_nodes: receipt.estimated_nodes(),
            dht_hash: receipt.dht_hash,
        })
    }

    /// Restore a distributed backup.
    ///
    /// # Errors
    /// - `NotFound` for a missing, expired or differently named backup
    /// - `DecryptionFailed` on a wrong key
    /// - `MissingShards` when shards are gone
    pub async fn restore(&self, request: RestoreRequest) -> Result<Vec<u8>> {
        let encryption_key = Zeroizing::new(request.encryption_key);
        self.backup
            .restore(&request.content_hash, &request.file_name, &encryption_key)
            .await
    }

    pub async fn backup_status(&self, manifest_address: &str) -> BackupStatus {
        self.backup.status(manifest_address).await
    }

    /// Whether at least 80% of a backup's shards are fetchable.
    pub async fn verify_backup(&self, manifest_address: &str) -> bool {
        self.backup.verify_integrity(manifest_address).await
    }

    /// Hash an account password with bcrypt.
    pub async fn hash_password(&self, password: &str) -> Result<String> {
        let rng = self.rng.clone();
        let password = Zeroizing::new(password.to_string());
        blocking(move || crypto::hash_password(&password, rng.as_ref())).await
    }

    /// Check an account password against a bcrypt hash. Never fails.
    pub async fn verify_password(&self, password: &str, hash: &str) -> bool {
        let password = Zeroizing::new(password.to_string());
        let hash = hash.to_string();
        blocking(move || Ok(crypto::verify_password(&password, &hash)))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::io::Write;
    use strongbox_crypto::kdf::MIN_ITERATIONS;
    use strongbox_crypto::{IntegrityFailure, SeededRandom};
    use strongbox_geo::{DenialReason, GeoCircle, ResolvedPlace, StaticResolver};
    use strongbox_storage::MemoryStore;
    use strongbox_timelock::{Clock, ManualClock, TimelockMode, TimelockState};

    struct Harness {
        service: EncryptionService,
        clock: Arc<ManualClock>,
        oracle: Arc<FixedOracle>,
        store: MemoryStore,
    }

    fn test_config() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.kdf.default_iterations = MIN_ITERATIONS;
        config.limits.min_shard_size = 16;
        config.limits.default_shard_size = 64;
        config
    }

    fn harness_with(config: ServiceConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
        ));
        let oracle = Arc::new(FixedOracle::new(100));
        let store = MemoryStore::new();
        let resolver = StaticResolver::new()
            .with_area(
                GeoCircle::new(41.0, 29.0, 50_000.0),
                ResolvedPlace::new("Turkey", "Istanbul"),
            )
            .with_area(
                GeoCircle::new(52.52, 13.405, 50_000.0),
                ResolvedPlace::new("Germany", "Berlin"),
            );

        let components = ServiceComponents {
            rng: SeededRandom::shared(21),
            oracle: oracle.clone(),
            clock: clock.clone(),
            resolver: Some(Arc::new(resolver)),
            store: Arc::new(store.clone()),
            replicas: Vec::new(),
        };
        Harness {
            service: EncryptionService::new(config, components).unwrap(),
            clock,
            oracle,
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(test_config())
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_with_cache() {
        let h = harness();
        let data = b"quarterly report".to_vec();
        let encrypted = h
            .service
            .encrypt(EncryptRequest::new(data.clone(), "correct horse"))
            .await
            .unwrap();
        assert!(encrypted.encrypted_data.is_some());
        assert!(encrypted.encrypted_shards.is_empty());
        assert_eq!(encrypted.original_size, data.len() as u64);
        assert_eq!(encrypted.file_hash, sha256_hex(&data));

        let request = DecryptRequest::from_response(&encrypted, "correct horse");
        let first = h.service.decrypt(request.clone()).await.unwrap();
        assert_eq!(first.file_data, data);
        assert!(!first.from_cache);

        let second = h.service.decrypt(request).await.unwrap();
        assert_eq!(second.file_data, data);
        assert!(second.from_cache);

        let wrong = DecryptRequest::from_response(&encrypted, "battery staple");
        assert!(matches!(
            h.service.decrypt(wrong).await,
            Err(Error::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_cache_can_be_disabled() {
        let mut config = test_config();
        config.cache.enabled = false;
        let h = harness_with(config);

        let encrypted = h
            .service
            .encrypt(EncryptRequest::new(b"data".to_vec(), "pw"))
            .await
            .unwrap();
        let request = DecryptRequest::from_response(&encrypted, "pw");
        h.service.decrypt(request.clone()).await.unwrap();
        assert!(!h.service.decrypt(request).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_sharded_roundtrip() {
        let h = harness();
        let data: Vec<u8> = (0..100u8).collect();
        let encrypted = h
            .service
            .encrypt(EncryptRequest::new(data.clone(), "pw").with_sharding(Some(32)))
            .await
            .unwrap();
        assert!(encrypted.encrypted_data.is_none());
        assert_eq!(encrypted.encrypted_shards.len(), 4);

        let decrypted = h
            .service
            .decrypt(DecryptRequest::from_response(&encrypted, "pw"))
            .await
            .unwrap();
        assert_eq!(decrypted.file_data, data);
    }

    #[tokio::test]
    async fn test_request_validation() {
        let mut config = test_config();
        config.limits.max_file_size = 128;
        let h = harness_with(config);

        let cases = vec![
            EncryptRequest::new(Vec::new(), "pw"),
            EncryptRequest::new(vec![0u8; 129], "pw"),
            EncryptRequest::new(b"x".to_vec(), "pw").with_iterations(5_000),
            EncryptRequest::new(b"x".to_vec(), "pw").with_iterations(2_000_000),
            EncryptRequest::new(b"x".to_vec(), "pw").with_sharding(Some(8)),
        ];
        for request in cases {
            assert!(matches!(
                h.service.encrypt(request).await,
                Err(Error::Validation(_))
            ));
        }

        let neither = DecryptRequest {
            encrypted_data: None,
            encrypted_shards: Vec::new(),
            password: "pw".to_string(),
        };
        assert!(matches!(
            h.service.decrypt(neither).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_quantum_safe_flag_is_ignored() {
        let h = harness();
        let mut request = EncryptRequest::new(b"data".to_vec(), "pw");
        request.quantum_safe = true;
        let encrypted = h.service.encrypt(request).await.unwrap();
        let payload = encrypted.encrypted_data.unwrap();
        assert_eq!(payload.algorithm, crypto::AeadAlgorithm::Aes256Gcm);
    }

    #[tokio::test]
    async fn test_validate_password() {
        let h = harness();
        let encrypted = h
            .service
            .encrypt(EncryptRequest::new(b"data".to_vec(), "pw"))
            .await
            .unwrap();
        let payload = encrypted.encrypted_data.unwrap();
        assert!(h.service.validate_password("pw", &payload).await);
        assert!(!h.service.validate_password("nope", &payload).await);
    }

    fn timelock_request(
        mode: TimelockMode,
        unlock_at: Option<chrono::DateTime<Utc>>,
        block_number: Option<u64>,
    ) -> TimelockEncryptRequest {
        TimelockEncryptRequest {
            file_data: b"sealed until later".to_vec(),
            password: "pw".to_string(),
            unlock_at,
            block_number,
            timelock_type: mode,
            key_derivation_iterations: None,
        }
    }

    #[tokio::test]
    async fn test_timestamp_timelock() {
        let h = harness();
        let unlock_at = h.clock.now() + ChronoDuration::hours(1);
        let sealed = h
            .service
            .timelock_encrypt(timelock_request(TimelockMode::Timestamp, Some(unlock_at), None))
            .await
            .unwrap();
        assert_eq!(sealed.unlock_at, Some(unlock_at));
        assert_eq!(sealed.block_number, None);

        let request = TimelockDecryptRequest::from_response(&sealed, "pw");
        match h.service.timelock_decrypt(request.clone()).await {
            Err(Error::TimelockNotYetUnlockable { unmet }) => assert_eq!(unmet.len(), 1),
            other => panic!("expected locked, got {:?}", other.map(|_| ())),
        }

        let status = h
            .service
            .timelock_status(TimelockStatusRequest {
                timelock_type: TimelockMode::Timestamp,
                unlock_at: Some(unlock_at),
                block_number: None,
            })
            .await
            .unwrap();
        assert_eq!(status.state, TimelockState::Locked);
        assert_eq!(status.remaining_seconds, Some(3600));

        h.clock.advance(ChronoDuration::hours(2));
        let plaintext = h.service.timelock_decrypt(request.clone()).await.unwrap();
        assert_eq!(plaintext, b"sealed until later");

        let mut wrong = request;
        wrong.password = "other".to_string();
        assert!(matches!(
            h.service.timelock_decrypt(wrong).await,
            Err(Error::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_block_and_hybrid_timelocks() {
        let h = harness();
        let block = h
            .service
            .timelock_encrypt(timelock_request(TimelockMode::BlockHeight, None, Some(105)))
            .await
            .unwrap();
        let block_request = TimelockDecryptRequest::from_response(&block, "pw");
        assert!(matches!(
            h.service.timelock_decrypt(block_request.clone()).await,
            Err(Error::TimelockNotYetUnlockable { .. })
        ));

        let past = h.clock.now() - ChronoDuration::minutes(1);
        let hybrid = h
            .service
            .timelock_encrypt(timelock_request(TimelockMode::Hybrid, Some(past), Some(105)))
            .await
            .unwrap();
        let hybrid_request = TimelockDecryptRequest::from_response(&hybrid, "pw");
        assert!(matches!(
            h.service.timelock_decrypt(hybrid_request.clone()).await,
            Err(Error::TimelockNotYetUnlockable { .. })
        ));

        h.oracle.set_height(105);
        assert!(h.service.timelock_decrypt(block_request).await.is_ok());
        assert!(h.service.timelock_decrypt(hybrid_request).await.is_ok());
    }

    #[tokio::test]
    async fn test_timelock_condition_cannot_be_rewritten() {
        let h = harness();
        let later = h.clock.now() + ChronoDuration::days(365);
        let past = h.clock.now() - ChronoDuration::days(1);

        let timed = h
            .service
            .timelock_encrypt(timelock_request(TimelockMode::Timestamp, Some(later), None))
            .await
            .unwrap();
        let mut earlier = TimelockDecryptRequest::from_response(&timed, "pw");
        earlier.unlock_at = Some(past);
        assert!(matches!(
            h.service.timelock_decrypt(earlier).await,
            Err(Error::DecryptionFailed)
        ));

        let blocked = h
            .service
            .timelock_encrypt(timelock_request(TimelockMode::BlockHeight, None, Some(1_000)))
            .await
            .unwrap();
        let mut lower = TimelockDecryptRequest::from_response(&blocked, "pw");
        lower.block_number = Some(50);
        assert!(matches!(
            h.service.timelock_decrypt(lower).await,
            Err(Error::DecryptionFailed)
        ));

        let mut switched = TimelockDecryptRequest::from_response(&blocked, "pw");
        switched.timelock_type = TimelockMode::Timestamp;
        switched.unlock_at = Some(past);
        assert!(matches!(
            h.service.timelock_decrypt(switched).await,
            Err(Error::DecryptionFailed)
        ));

        assert!(matches!(
            h.service
                .timelock_decrypt(TimelockDecryptRequest::from_response(&blocked, "pw"))
                .await,
            Err(Error::TimelockNotYetUnlockable { .. })
        ));
    }

    #[tokio::test]
    async fn test_timelock_rejects_incomplete_condition() {
        let h = harness();
        assert!(matches!(
            h.service
                .timelock_encrypt(timelock_request(TimelockMode::Hybrid, None, Some(1)))
                .await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_geofence_country_and_polygon() {
        let h = harness();
        let request = |lat: f64, lng: f64| -> GeoFenceRequest {
            serde_json::from_value(serde_json::json!({
                "latitude": lat,
                "longitude": lng,
                "isEnabled": true,
                "allowedCountries": ["Turkey"],
            }))
            .unwrap()
        };

        let istanbul = h.service.validate_geofence(request(41.0, 29.0)).await;
        assert!(istanbul.is_valid);

        let berlin = h.service.validate_geofence(request(52.52, 13.405)).await;
        assert!(!berlin.is_valid);
        assert_eq!(berlin.denial, Some(DenialReason::Country));

        let polygon = |lat: f64, lng: f64| -> GeoFenceRequest {
            serde_json::from_value(serde_json::json!({
                "latitude": lat,
                "longitude": lng,
                "isEnabled": true,
                "allowedPolygons": [[
                    {"lat": 40.0, "lng": 28.0}, {"lat": 42.0, "lng": 28.0},
                    {"lat": 42.0, "lng": 30.0}, {"lat": 40.0, "lng": 30.0}
                ]],
            }))
            .unwrap()
        };
        assert!(h.service.validate_geofence(polygon(41.0, 29.0)).await.is_valid);
        let outside = h.service.validate_geofence(polygon(10.0, 10.0)).await;
        assert!(!outside.is_valid);
        assert_eq!(outside.denial, Some(DenialReason::Polygon));
    }

    #[tokio::test]
    async fn test_geofence_ignores_asserted_place() {
        let h = harness();
        let claimed: GeoFenceRequest = serde_json::from_value(serde_json::json!({
            "latitude": 52.52,
            "longitude": 13.405,
            "country": "Turkey",
            "city": "Istanbul",
            "isEnabled": true,
            "allowedCountries": ["Turkey"],
            "allowedCities": ["Istanbul"],
        }))
        .unwrap();
        assert_eq!(claimed.location.country.as_deref(), Some("Turkey"));

        let response = h.service.validate_geofence(claimed).await;
        assert!(!response.is_valid);
        assert_eq!(response.denial, Some(DenialReason::Country));
    }

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[tokio::test]
    async fn test_hash_data_and_file() {
        let h = harness();
        let response = h
            .service
            .hash(HashRequest::for_data(b"abc".to_vec(), HashAlgorithm::Sha256))
            .await;
        assert!(response.success);
        assert_eq!(response.hash, ABC_SHA256);
        assert_eq!(response.file_size, 3);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        let from_file = h
            .service
            .hash(HashRequest::for_path(file.path(), HashAlgorithm::Sha256))
            .await;
        assert_eq!(from_file.hash, ABC_SHA256);

        let missing = h
            .service
            .hash(HashRequest::for_path("/nonexistent/file", HashAlgorithm::Md5))
            .await;
        assert!(!missing.success);
        assert!(missing.error_message.is_some());

        let empty = h.service.hash(HashRequest::default()).await;
        assert!(!empty.success);

        let verified = h
            .service
            .verify_hash(VerifyHashRequest {
                file_path: Some(file.path().to_path_buf()),
                file_data: None,
                expected_hash: ABC_SHA256.to_uppercase(),
                hash_algorithm: HashAlgorithm::Sha256,
            })
            .await
            .unwrap();
        assert!(verified);
    }

    #[tokio::test]
    async fn test_integrity_record() {
        let h = harness();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"original contents").unwrap();

        let record = h
            .service
            .create_integrity_record(file.path(), HashAlgorithm::Sha512, BTreeMap::new())
            .await
            .unwrap();
        assert!(h.service.verify_integrity(file.path(), &record).await.valid);

        file.write_all(b" and more").unwrap();
        let verdict = h.service.verify_integrity(file.path(), &record).await;
        assert!(!verdict.valid);
        assert_eq!(verdict.reason, Some(IntegrityFailure::SizeMismatch));
    }

    #[tokio::test]
    async fn test_backup_restore_status() {
        let h = harness();
        let data: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        let mut request = BackupRequest::new(data.clone(), "ledger.db", "backup key");
        request.shard_size = Some(64);

        let response = h.service.backup(request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.shard_count, 4);
        assert_eq!(response.content_hashes.len(), 4);
        assert_eq!(response.estimated_nodes, 1);

        let restored = h
            .service
            .restore(RestoreRequest {
                content_hash: response.dht_hash.clone(),
                file_name: "ledger.db".to_string(),
                encryption_key: "backup key".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(restored, data);

        let status = h.service.backup_status(&response.dht_hash).await;
        assert!(status.exists);
        assert_eq!(status.total_shards, 4);
        assert!(h.service.verify_backup(&response.dht_hash).await);

        h.store.lose(&response.content_hashes[0]);
        let restore = h
            .service
            .restore(RestoreRequest {
                content_hash: response.dht_hash.clone(),
                file_name: "ledger.db".to_string(),
                encryption_key: "backup key".to_string(),
            })
            .await;
        assert!(matches!(restore, Err(Error::MissingShards { .. })));
        assert!(!h.service.verify_backup(&response.dht_hash).await);
    }

    #[tokio::test]
    async fn test_backup_rejects_small_shards() {
        let h = harness();
        let mut request = BackupRequest::new(vec![1u8; 64], "a", "k");
        request.shard_size = Some(4);
        assert!(matches!(
            h.service.backup(request).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_password_hashing() {
        let h = harness();
        let hash = h.service.hash_password("hunter2").await.unwrap();
        assert!(h.service.verify_password("hunter2", &hash).await);
        assert!(!h.service.verify_password("hunter3", &hash).await);
        assert!(!h.service.verify_password("hunter2", "not a hash").await);
    }

    #[tokio::test]
    async fn test_from_default_config() {
        let service = EncryptionService::from_config(ServiceConfig::default()).unwrap();
        let status = service.backup_status("missing").await;
        assert!(!status.exists);
    }
}
