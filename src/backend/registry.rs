//! Backend registry
//!
//! Built once at process start and passed to whoever needs to pick a backend
//! at runtime. Lookups may come from several tasks at once.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::worktree::{self, WorktreeBackend};
use super::{Backend, BackendError};
use crate::config::BackendConfig;

/// Builds a backend instance from its configuration
pub type BackendFactory =
    Arc<dyn Fn(&BackendConfig) -> Result<Arc<dyn Backend>, BackendError> + Send + Sync>;

#[derive(Default)]
pub struct BackendRegistry {
    factories: RwLock<HashMap<String, BackendFactory>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend type
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(worktree::BACKEND_TYPE, |config: &BackendConfig| {
            Ok(Arc::new(WorktreeBackend::new(config)) as Arc<dyn Backend>)
        });
        registry
    }

    /// Register `factory` under `backend_type`.
    ///
    /// # Panics
    ///
    /// Registering the same type twice is a startup wiring bug and panics.
    pub fn register<F>(&self, backend_type: &str, factory: F)
    where
        F: Fn(&BackendConfig) -> Result<Arc<dyn Backend>, BackendError> + Send + Sync + 'static,
    {
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if factories.contains_key(backend_type) {
            panic!("backend type {backend_type:?} already registered");
        }
        factories.insert(backend_type.to_string(), Arc::new(factory));
    }

    /// New backend instance for `config.backend_type`
    pub fn get(&self, config: &BackendConfig) -> Result<Arc<dyn Backend>, BackendError> {
        let factory = {
            let factories = self
                .factories
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            factories.get(&config.backend_type).cloned()
        };
        match factory {
            Some(factory) => factory(config),
            None => Err(BackendError::UnknownType(config.backend_type.clone())),
        }
    }

    /// Registered type names, sorted
    pub fn registered_types(&self) -> Vec<String> {
        let factories = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut types: Vec<String> = factories.keys().cloned().collect();
        types.sort();
        types
    }
}
