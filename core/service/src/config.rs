//! Service configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use strongbox_common::{Error, Result, RetryConfig};
use strongbox_crypto::kdf::{DEFAULT_ITERATIONS, MAX_ITERATIONS, MIN_ITERATIONS};
use strongbox_crypto::DEFAULT_SHARD_SIZE;
use strongbox_storage::StoreSpec;

/// Password key derivation bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub default_iterations: u32,
    pub min_iterations: u32,
    pub max_iterations: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            default_iterations: DEFAULT_ITERATIONS,
            min_iterations: MIN_ITERATIONS,
            max_iterations: MAX_ITERATIONS,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_file_size: usize,
    pub default_shard_size: usize,
    pub min_shard_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            default_shard_size: DEFAULT_SHARD_SIZE,
            min_shard_size: 1024,
        }
    }
}

/// Decrypt result cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            capacity: 256,
        }
    }
}

/// Block-height oracle. Without an RPC URL block-height timelocks never
/// unlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub block_interval_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            timeout_secs: 10,
            max_retries: 2,
            block_interval_secs: 12,
        }
    }
}

impl ChainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
    }
}

/// Location resolver. Without one, country and city rules need the
/// caller to supply them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub resolver_enabled: bool,
    pub ip_api_url: String,
    pub reverse_geocode_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            resolver_enabled: false,
            ip_api_url: "http://ip-api.com".to_string(),
            reverse_geocode_url: "https://nominatim.openstreetmap.org".to_string(),
            timeout_secs: 5,
            max_retries: 1,
        }
    }
}

impl GeoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
    }
}

/// Distributed backup stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub store: StoreSpec,
    pub replicas: Vec<StoreSpec>,
    pub replication_factor: u32,
    pub node_timeout_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            store: StoreSpec::memory(),
            replicas: Vec::new(),
            replication_factor: 3,
            node_timeout_secs: 10,
        }
    }
}

/// Top-level configuration of the encryption service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub kdf: KdfConfig,
    pub limits: LimitsConfig,
    pub cache: CacheConfig,
    pub chain: ChainConfig,
    pub geo: GeoConfig,
    pub backup: BackupConfig,
}

impl ServiceConfig {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check the configured bounds are consistent.
    pub fn validate(&self) -> Result<()> {
        let kdf = &self.kdf;
        if kdf.min_iterations < MIN_ITERATIONS
            || kdf.max_iterations > MAX_ITERATIONS
            || kdf.min_iterations > kdf.max_iterations
            || !(kdf.min_iterations..=kdf.max_iterations).contains(&kdf.default_iterations)
        {
            return Err(Error::Validation(format!(
                "KDF iterations must satisfy {} <= min <= default <= max <= {}",
                MIN_ITERATIONS, MAX_ITERATIONS
            )));
        }

        let limits = &self.limits;
        if limits.min_shard_size == 0
            || limits.default_shard_size < limits.min_shard_size
            || limits.max_file_size == 0
        {
            return Err(Error::Validation(
                "Shard sizes must satisfy 0 < min <= default and max file size must be positive"
                    .to_string(),
            ));
        }

        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(Error::Validation(
                "Cache capacity must be positive when the cache is enabled".to_string(),
            ));
        }

        if self.chain.timeout_secs == 0 || self.geo.timeout_secs == 0 || self.backup.node_timeout_secs == 0 {
            return Err(Error::Validation("Timeouts must be positive".to_string()));
        }
        Ok(())
    }
}
