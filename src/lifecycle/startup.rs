//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Select the L2 backend (Redis, or the in-memory substitute)
//! - Build the cache manager and the integration registry in dependency order
//! - Tear the layer down again (close connections)
//!
//! # Design Decisions
//! - Fail fast on invalid configuration
//! - Never fail on an unreachable cache: fall back to memory and log loudly
//! - The layer is built once and shared by handle; collaborators receive it
//!   explicitly instead of reaching for globals

use std::sync::Arc;

use crate::cache::{CacheManager, DistributedCache, KvStore, MemoryStore, RedisStore};
use crate::config::loader::ConfigError;
use crate::config::validation::validate_config;
use crate::config::{LayerConfig, RedisConfig};
use crate::integrations::IntegrationRegistry;

/// Process-wide cache and integrations, built from one configuration.
#[derive(Debug, Clone)]
pub struct IntegrationLayer {
    config: Arc<LayerConfig>,
    cache: CacheManager,
    registry: Arc<IntegrationRegistry>,
}

impl IntegrationLayer {
    /// Validate `config`, connect the L2 backend and register integrations.
    pub async fn build(config: LayerConfig) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let store = if config.memory.enable_l2 {
            Some(select_store(&config.redis).await)
        } else {
            None
        };
        Ok(Self::assemble(config, store))
    }

    /// Build on a caller-supplied store. Configuration is still validated.
    pub fn with_store(config: LayerConfig, store: Arc<dyn KvStore>) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(Self::assemble(config, Some(store)))
    }

    fn assemble(config: LayerConfig, store: Option<Arc<dyn KvStore>>) -> Self {
        let l2 = store.map(|store| Arc::new(DistributedCache::new(store, config.redis.clone())));
        let cache = CacheManager::new(config.memory.clone(), l2);
        let registry = Arc::new(IntegrationRegistry::from_config(&config, Some(cache.clone())));

        tracing::info!(
            integrations = registry.len(),
            l2_backend = cache.l2().map(|l2| l2.backend_name()).unwrap_or("disabled"),
            "Integration layer ready"
        );

        Self {
            config: Arc::new(config),
            cache,
            registry,
        }
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<IntegrationRegistry> {
        &self.registry
    }

    /// Close backend connections.
    pub async fn shutdown(&self) {
        self.cache.disconnect().await;
        tracing::info!("Integration layer shut down");
    }
}

/// Redis when configured and reachable, otherwise the in-memory store.
pub async fn select_store(redis: &RedisConfig) -> Arc<dyn KvStore> {
    let Some(url) = redis.connection_url() else {
        tracing::info!("Redis not configured, using in-memory L2 store");
        return Arc::new(MemoryStore::new());
    };

    match RedisStore::connect(&url, redis.connection_timeout()).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, falling back to in-memory L2 store");
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_without_redis_uses_memory() {
        let layer = IntegrationLayer::build(LayerConfig::default()).await.unwrap();
        assert_eq!(layer.cache().l2().unwrap().backend_name(), "memory");
        assert_eq!(layer.registry().len(), 6);

        layer.shutdown().await;
        assert!(!layer.cache().l2().unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let mut config = LayerConfig::default();
        config.circuit_breaker.error_threshold_percentage = 150;
        let err = IntegrationLayer::build(config).await.unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[tokio::test]
    async fn test_l2_disabled() {
        let mut config = LayerConfig::default();
        config.memory.enable_l2 = false;
        let layer = IntegrationLayer::build(config).await.unwrap();
        assert!(layer.cache().l2().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back() {
        let redis = RedisConfig {
            url: Some("redis://127.0.0.1:1/0".to_string()),
            connection_timeout_ms: 200,
            ..RedisConfig::default()
        };
        assert_eq!(select_store(&redis).await.backend_name(), "memory");
    }
}
