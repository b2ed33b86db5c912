//! Driver registry for choosing a backend by name at construction time.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use cloudblob_common::{Error, Result};

use crate::bucket::Bucket;
use crate::driver::Driver;

/// Factory function type for creating drivers.
pub type DriverFactory = Box<dyn Fn(Value) -> Result<Arc<dyn Driver>> + Send + Sync>;

/// Registry of driver factories keyed by driver name.
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a driver factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: DriverFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Driver '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build a driver by name from its configuration.
    ///
    /// # Errors
    /// - Driver not registered
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn Driver>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Driver '{}' is not registered", name)))?;
        factory(config)
    }

    /// Build a driver and wrap it in a [`Bucket`].
    pub fn open_bucket(&self, name: &str, config: Value) -> Result<Bucket> {
        Ok(Bucket::from_arc(self.resolve(name, config)?))
    }

    /// Get list of registered driver names, sorted.
    pub fn drivers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_driver(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the bundled drivers.
pub fn create_default_registry() -> DriverRegistry {
    let mut factories: HashMap<String, DriverFactory> = HashMap::new();
    factories.insert(
        "memblob".to_string(),
        Box::new(crate::memblob::create_memblob_driver),
    );
    factories.insert(
        "fileblob".to_string(),
        Box::new(crate::fileblob::create_fileblob_driver),
    );
    DriverRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memblob::MemBucket;
    use crate::memblob::MemblobConfig;
    use crate::writer::WriterOptions;
    use tempfile::TempDir;

    fn mem_factory() -> DriverFactory {
        Box::new(|_| {
            let config = MemblobConfig {
                bucket_name: "test".to_string(),
                region: "local".to_string(),
            };
            Ok(Arc::new(MemBucket::from_config(&config)?))
        })
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = DriverRegistry::new();
        registry.register("test", mem_factory()).unwrap();

        let driver = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(driver.name(), "memblob");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = DriverRegistry::new();
        registry.register("test", mem_factory()).unwrap();
        assert!(registry.register("test", mem_factory()).is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = DriverRegistry::new();
        assert!(matches!(
            registry.resolve("unknown", Value::Null),
            Err(e) if e.is_not_found()
        ));
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert_eq!(registry.drivers(), vec!["fileblob", "memblob"]);
        assert!(registry.has_driver("memblob"));
    }

    #[tokio::test]
    async fn test_open_bucket_from_config() {
        let temp = TempDir::new().unwrap();
        let registry = create_default_registry();

        let bucket = registry
            .open_bucket("fileblob", serde_json::json!({ "root": temp.path() }))
            .unwrap();
        bucket
            .write_all("k", b"v", "text/plain", WriterOptions::new())
            .await
            .unwrap();
        assert_eq!(bucket.driver_name(), "fileblob");
        assert_eq!(bucket.read_all("k").await.unwrap(), b"v");

        let bucket = registry
            .open_bucket("memblob", serde_json::json!({ "bucket_name": "b" }))
            .unwrap();
        assert_eq!(bucket.driver_name(), "memblob");
    }
}
