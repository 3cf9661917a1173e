//! Backend registry for configuration-driven backend construction.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use cask_common::{Error, Result};

use crate::provider::BlobBackend;

/// Factory function type for creating backends.
pub type BackendFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn BlobBackend>> + Send + Sync>;

/// Serialized description of a backend to construct.
///
/// ```json
/// { "kind": "local", "options": { "root": "/var/lib/cask" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Registered backend name.
    pub kind: String,
    /// Backend-specific options.
    #[serde(default)]
    pub options: Value,
}

impl BackendConfig {
    pub fn new(kind: impl Into<String>, options: Value) -> Self {
        Self {
            kind: kind.into(),
            options,
        }
    }

    /// Parse a backend description from JSON.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Registry for backend factories.
///
/// Allows dynamic registration and resolution of backends by name and
/// configuration.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a backend by name and options.
    ///
    /// # Errors
    /// - Backend not registered
    /// - Options invalid for the backend
    pub fn resolve(&self, name: &str, options: &Value) -> Result<Arc<dyn BlobBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Backend '{}' is not registered", name)))?;
        factory(options)
    }

    /// Build the backend a config describes.
    pub fn build(&self, config: &BackendConfig) -> Result<Arc<dyn BlobBackend>> {
        self.resolve(&config.kind, &config.options)
    }

    /// Get the sorted list of registered backend names.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in backends.
///
/// - `memory`: option `versioning` (bool, default false)
/// - `local`: option `root` (path, required)
pub fn create_default_registry() -> BackendRegistry {
    let mut factories: HashMap<String, BackendFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|options: &Value| {
            let versioning = options
                .get("versioning")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let backend: Arc<dyn BlobBackend> =
                Arc::new(crate::memory::MemoryBackend::with_versioning(versioning));
            Ok(backend)
        }),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|options: &Value| {
            let root = options
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidInput("Local backend requires 'root' path".to_string())
                })?;
            let backend: Arc<dyn BlobBackend> = Arc::new(crate::local::LocalBackend::new(root)?);
            Ok(backend)
        }),
    );

    BackendRegistry { factories }
}
