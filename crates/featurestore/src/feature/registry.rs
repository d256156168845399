//! Feature registry mapping stable string keys to implementations

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Feature, FeatureDefinition};

/// Registry of feature implementations
///
/// Feature records store a registry key; the scheduler and workers look the
/// implementation up here.
pub struct FeatureRegistry {
    features: HashMap<String, Arc<dyn Feature>>,
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            features: HashMap::new(),
        }
    }

    /// Register a feature type under its `KEY`
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut registry = FeatureRegistry::new();
    /// registry.register::<PriceRatio>()?;
    /// ```
    pub fn register<F: FeatureDefinition>(&mut self) -> Result<(), RegistryError> {
        self.register_instance(F::KEY, Arc::new(F::default()))
    }

    /// Register an already constructed feature
    pub fn register_instance(
        &mut self,
        key: impl Into<String>,
        feature: Arc<dyn Feature>,
    ) -> Result<(), RegistryError> {
        let key = key.into();
        if self.features.contains_key(&key) {
            return Err(RegistryError::DuplicateKey(key));
        }
        self.features.insert(key, feature);
        Ok(())
    }

    /// Look up a feature implementation
    pub fn get(&self, key: &str) -> Result<Arc<dyn Feature>, RegistryError> {
        self.features
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownFeature(key.to_string()))
    }

    /// Check if a feature key is registered
    pub fn contains(&self, key: &str) -> bool {
        self.features.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Get all registered feature keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureRegistry")
            .field("keys", &self.features.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Feature key not registered
    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    /// Feature key registered twice
    #[error("feature key already registered: {0}")]
    DuplicateKey(String),
}
