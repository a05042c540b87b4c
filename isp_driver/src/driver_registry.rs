//! Backend registry for ISP hardware backends.
//!
//! Provides a `BackendRegistry` struct for registering and retrieving backend
//! factories. Constructed at startup and consulted once to build the backend
//! an `IspDriver` runs on.

use isp_common::config::DriverConfig;
use isp_common::isp::hal::{HalError, HalFactory, IspHal};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of available ISP backends.
pub struct BackendRegistry {
    factories: HashMap<&'static str, HalFactory>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry populated with every built-in backend.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_builtin(&mut registry);
        registry
    }

    /// Register a backend factory.
    ///
    /// # Panics
    /// Panics if a backend with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: HalFactory) {
        if self.factories.contains_key(name) {
            panic!("Backend '{name}' is already registered");
        }
        debug!("Registered backend '{}'", name);
        self.factories.insert(name, factory);
    }

    /// Get a backend factory by name.
    pub fn get_factory(&self, name: &str) -> Option<HalFactory> {
        self.factories.get(name).copied()
    }

    /// Create a backend instance by name.
    ///
    /// # Errors
    /// - `HalError::BackendNotFound` if no backend with the given name is registered
    /// - Whatever the factory returns if construction fails
    pub fn create_backend(&self, name: &str, config: &DriverConfig) -> Result<Arc<dyn IspHal>, HalError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| HalError::BackendNotFound(name.to_string()))?;
        Ok(Arc::from(factory(config)?))
    }

    /// List all registered backend names.
    pub fn list_backends(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
