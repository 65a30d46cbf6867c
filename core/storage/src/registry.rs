//! Store registry for resolving content stores by name.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::ipfs::{IpfsConfig, IpfsStore};
use crate::local::LocalStore;
use crate::memory::MemoryStore;
use crate::provider::SharedStore;
use strongbox_common::{Error, Result};

/// Factory function type for creating stores.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<SharedStore> + Send + Sync>;

/// Registry for content store factories.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - `InvalidInput` if `name` is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a store by name and configuration.
    ///
    /// # Errors
    /// - `NotFound` if no factory is registered under `name`
    /// - Whatever the factory reports for an invalid configuration
    pub fn resolve(&self, name: &str, config: Value) -> Result<SharedStore> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Store '{}' is not registered", name)))?;
        factory(config)
    }

    /// Resolve a store from a spec.
    pub fn resolve_spec(&self, spec: &StoreSpec) -> Result<SharedStore> {
        self.resolve(&spec.provider, spec.config.clone())
    }

    /// Get list of registered store names.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a store is registered.
    pub fn has_store(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in stores (`memory`, `local`, `ipfs`).
pub fn create_default_registry() -> StoreRegistry {
    let mut factories: HashMap<String, StoreFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|config| {
            let name = config.get("name").and_then(Value::as_str).unwrap_or("memory");
            Ok(Arc::new(MemoryStore::with_name(name)))
        }),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|config| {
            let root = config
                .get("root")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidInput("Local store requires 'root' path".to_string()))?;
            Ok(Arc::new(LocalStore::new(root)?))
        }),
    );

    factories.insert(
        "ipfs".to_string(),
        Box::new(|config| {
            let config: IpfsConfig = serde_json::from_value(config)
                .map_err(|e| Error::InvalidInput(format!("Invalid IPFS config: {}", e)))?;
            Ok(Arc::new(IpfsStore::new(config)?))
        }),
    );

    StoreRegistry { factories }
}

/// Name plus configuration of a store, as found in config files.
///
/// The short form accepted by [`FromStr`] is `memory`, `local:<dir>` or
/// `ipfs:<api url>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSpec {
    pub provider: String,
    #[serde(default)]
    pub config: Value,
}

impl StoreSpec {
    pub fn memory() -> Self {
        Self {
            provider: "memory".to_string(),
            config: Value::Null,
        }
    }

    pub fn local(root: impl Into<String>) -> Self {
        Self {
            provider: "local".to_string(),
            config: json!({ "root": root.into() }),
        }
    }

    pub fn ipfs(api_url: impl Into<String>) -> Self {
        Self {
            provider: "ipfs".to_string(),
            config: json!({ "api_url": api_url.into() }),
        }
    }
}

impl Default for StoreSpec {
    fn default() -> Self {
        Self::memory()
    }
}

impl FromStr for StoreSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            None if s == "memory" => Ok(Self::memory()),
            Some(("memory", name)) => Ok(Self {
                provider: "memory".to_string(),
                config: json!({ "name": name }),
            }),
            Some(("local", root)) if !root.is_empty() => Ok(Self::local(root)),
            Some(("ipfs", url)) if !url.is_empty() => Ok(Self::ipfs(url)),
            _ => Err(Error::InvalidInput(format!(
                "Invalid store spec '{}': expected memory, local:<dir> or ipfs:<url>",
                s
            ))),
        }
    }
}

impl fmt::Display for StoreSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = ["root", "api_url", "name"]
            .iter()
            .find_map(|key| self.config.get(*key).and_then(Value::as_str));
        match detail {
            Some(detail) => write!(f, "{}:{}", self.provider, detail),
            None => f.write_str(&self.provider),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = StoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let store = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = create_default_registry();
        let result = registry.register("memory", Box::new(|_| Ok(Arc::new(MemoryStore::new()))));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = create_default_registry();
        assert!(matches!(
            registry.resolve("s3", Value::Null),
            Err(Error::NotFound(_))
        ));
        assert_eq!(registry.stores(), vec!["ipfs", "local", "memory"]);
    }

    #[test]
    fn test_local_requires_root() {
        let registry = create_default_registry();
        assert!(matches!(
            registry.resolve("local", json!({})),
            Err(Error::InvalidInput(_))
        ));

        let temp = TempDir::new().unwrap();
        let spec = StoreSpec::local(temp.path().to_string_lossy());
        assert_eq!(registry.resolve_spec(&spec).unwrap().name(), "local");
    }

    #[test]
    fn test_spec_parsing() {
        assert_eq!("memory".parse::<StoreSpec>().unwrap(), StoreSpec::memory());
        assert_eq!(
            "local:/var/strongbox".parse::<StoreSpec>().unwrap(),
            StoreSpec::local("/var/strongbox")
        );

        let ipfs: StoreSpec = "ipfs:http://127.0.0.1:5001".parse().unwrap();
        assert_eq!(ipfs, StoreSpec::ipfs("http://127.0.0.1:5001"));
        assert_eq!(ipfs.to_string(), "ipfs:http://127.0.0.1:5001");

        let named: StoreSpec = "memory:replica-1".parse().unwrap();
        let store = create_default_registry().resolve_spec(&named).unwrap();
        assert_eq!(store.name(), "replica-1");

        assert!("local:".parse::<StoreSpec>().is_err());
        assert!("ftp:host".parse::<StoreSpec>().is_err());
    }
}
