//! Shared fixtures for integration tests.

#![allow(dead_code)]

use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use integration_layer::cache::{DistributedCache, KvStore, MemoryStore};
use integration_layer::config::{IntegrationConfig, LayerConfig, RedisConfig};
use integration_layer::IntegrationLayer;

pub const ADMIN_KEY: &str = "test-admin-key";

/// A service that fails its first `failures` attempts, then answers `response`.
pub struct FlakyService {
    calls: AtomicU32,
    failures: u32,
    response: Value,
}

impl FlakyService {
    pub fn new(failures: u32, response: Value) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failures,
            response,
        }
    }

    /// A service that never succeeds.
    pub fn down() -> Self {
        Self::new(u32::MAX, Value::Null)
    }

    pub fn attempt(&self) -> impl Future<Output = Result<Value, String>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = n <= self.failures;
        let response = self.response.clone();
        async move {
            if fail {
                Err(format!("upstream error on attempt {n}"))
            } else {
                Ok(response)
            }
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Configuration with the given integrations and a known admin key.
pub fn config_with(integrations: Vec<IntegrationConfig>) -> LayerConfig {
    let mut config = LayerConfig::default();
    config.integrations = integrations;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

/// Layer backed by an in-memory L2 store.
pub fn memory_layer(config: LayerConfig) -> IntegrationLayer {
    IntegrationLayer::with_store(config, Arc::new(MemoryStore::new()))
        .expect("test configuration is valid")
}

/// L2 client and the raw store beneath it.
pub fn distributed_cache(redis: RedisConfig) -> (Arc<DistributedCache>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn KvStore> = store.clone();
    (Arc::new(DistributedCache::new(dyn_store, redis)), store)
}
