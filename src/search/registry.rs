//! Explicit registry of embedding providers.
//!
//! Providers are registered by name at startup and the engine builds the one
//! named in [`EmbedderConfig`]. There is no process-wide registry: callers
//! construct one, populate it and pass it in.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::{EmbeddingProvider, HashingEmbedder};
use crate::config::EmbedderConfig;
use crate::error::{Error, Result};

/// Builds a provider from the embedder configuration.
pub type ProviderFactory =
    Arc<dyn Fn(&EmbedderConfig) -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync>;

/// One named registry entry.
#[derive(Clone)]
pub struct ProviderRegistration {
    /// Stable provider name
    pub name: String,
    /// Human-readable description
    pub description: String,
    factory: ProviderFactory,
}

impl std::fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Name → provider factory map.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, ProviderRegistration>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the providers compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        // Names are distinct, registration cannot collide.
        let _ = registry.register(
            "hashing",
            "Deterministic feature-hashing embedder (offline)",
            Arc::new(
                |config: &EmbedderConfig| -> Result<Arc<dyn EmbeddingProvider>> {
                    Ok(Arc::new(HashingEmbedder::new(config.dimension)) as Arc<dyn EmbeddingProvider>)
                },
            ),
        );
        #[cfg(feature = "fastembed")]
        let _ = registry.register(
            "fastembed",
            "FastEmbed all-MiniLM-L6-v2 (downloads model on first use)",
            Arc::new(|_: &EmbedderConfig| -> Result<Arc<dyn EmbeddingProvider>> {
                Ok(Arc::new(super::FastEmbedProvider::new()?) as Arc<dyn EmbeddingProvider>)
            }),
        );
        registry
    }

    /// Register a provider factory under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        factory: ProviderFactory,
    ) -> Result<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(Error::AlreadyRegistered(name));
        }
        debug!(provider = %name, "Embedding provider registered");
        self.entries.insert(
            name.clone(),
            ProviderRegistration {
                name,
                description: description.into(),
                factory,
            },
        );
        Ok(())
    }

    /// Register an already constructed provider under its metadata name.
    pub fn register_instance(&mut self, provider: Arc<dyn EmbeddingProvider>) -> Result<()> {
        let metadata = provider.metadata();
        self.register(
            metadata.name,
            metadata.description,
            Arc::new(
                move |_: &EmbedderConfig| -> Result<Arc<dyn EmbeddingProvider>> {
                    Ok(provider.clone())
                },
            ),
        )
    }

    /// Remove a provider.
    pub fn unregister(&mut self, name: &str) -> Result<()> {
        self.entries
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::Config(format!("unknown embedding provider '{}'", name)))
    }

    /// Build the provider named in `config`.
    pub fn build(&self, config: &EmbedderConfig) -> Result<Arc<dyn EmbeddingProvider>> {
        let entry = self.entries.get(&config.provider).ok_or_else(|| {
            Error::Config(format!(
                "unknown embedding provider '{}' (available: {})",
                config.provider,
                self.names().join(", ")
            ))
        })?;
        (entry.factory)(config)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Registered entries in name order.
    pub fn registrations(&self) -> impl Iterator<Item = &ProviderRegistration> {
        self.entries.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_contains_hashing() {
        let registry = ProviderRegistry::with_builtin();
        assert!(registry.contains("hashing"));

        let provider = registry.build(&EmbedderConfig::default()).unwrap();
        assert_eq!(provider.metadata().name, "hashing");
        assert_eq!(provider.metadata().dimension, 256);

        let vector = tokio_test::block_on(provider.embed("plan a trip")).unwrap();
        assert_eq!(vector.len(), 256);
    }

    #[test]
    fn test_build_respects_dimension() {
        let registry = ProviderRegistry::with_builtin();
        let config = EmbedderConfig {
            provider: "hashing".into(),
            dimension: 64,
        };
        assert_eq!(registry.build(&config).unwrap().metadata().dimension, 64);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ProviderRegistry::with_builtin();
        let result = registry.register_instance(Arc::new(HashingEmbedder::new(8)));
        assert!(matches!(result, Err(Error::AlreadyRegistered(name)) if name == "hashing"));
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        let result = registry.build(&EmbedderConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unregister() {
        let mut registry = ProviderRegistry::with_builtin();
        registry.unregister("hashing").unwrap();
        assert!(!registry.contains("hashing"));
        assert!(registry.unregister("hashing").is_err());
    }
}
