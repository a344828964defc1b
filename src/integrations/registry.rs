//! One [`Integration`] per external service.
//!
//! # Responsibilities
//! - Build and hold a wrapper (and so a breaker) per configured service
//! - Report per-service status for the admin API
//!
//! # Design Decisions
//! - Registration is idempotent per name: the first instance wins, so one
//!   failing dependency can never share a breaker with another
//! - Status derives from breaker state first, then the window error rate

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use super::wrapper::Integration;
use crate::cache::CacheManager;
use crate::config::{CircuitBreakerConfig, IntegrationConfig, LayerConfig};
use crate::resilience::{BreakerStats, CircuitState};

/// Error rate (percent) above which a closed circuit reports degraded.
pub const DEGRADED_ERROR_RATE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Operational,
    Degraded,
    Down,
}

impl ServiceStatus {
    fn derive(state: CircuitState, error_rate: f64) -> Self {
        match state {
            CircuitState::Open => Self::Down,
            CircuitState::HalfOpen => Self::Degraded,
            CircuitState::Closed if error_rate > DEGRADED_ERROR_RATE => Self::Degraded,
            CircuitState::Closed => Self::Operational,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrationStatus {
    pub name: String,
    pub status: ServiceStatus,
    pub state: CircuitState,
    pub fires: u64,
    pub error_rate: f64,
    pub mean_latency_ms: f64,
    pub cache_enabled: bool,
    pub breaker: BreakerStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryHealth {
    pub healthy: bool,
    pub open_circuits: Vec<String>,
}

#[derive(Debug)]
pub struct IntegrationRegistry {
    integrations: DashMap<String, Arc<Integration>>,
    breaker_defaults: CircuitBreakerConfig,
    cache: Option<CacheManager>,
}

impl IntegrationRegistry {
    pub fn new(breaker_defaults: CircuitBreakerConfig, cache: Option<CacheManager>) -> Self {
        Self {
            integrations: DashMap::new(),
            breaker_defaults,
            cache,
        }
    }

    /// Registry with every integration from `config`.
    pub fn from_config(config: &LayerConfig, cache: Option<CacheManager>) -> Self {
        let registry = Self::new(config.circuit_breaker.clone(), cache);
        for integration in &config.integrations {
            registry.register(integration.clone());
        }
        tracing::info!(count = registry.len(), "Integrations registered");
        registry
    }

    /// Register a service, or return the existing instance for its name.
    pub fn register(&self, config: IntegrationConfig) -> Arc<Integration> {
        let name = config.name.clone();
        let entry = self.integrations.entry(name.clone()).or_insert_with(|| {
            tracing::debug!(integration = %name, timeout_ms = config.timeout_ms, "Registering integration");
            Arc::new(Integration::new(config, &self.breaker_defaults, self.cache.clone()))
        });
        Arc::clone(entry.value())
    }

    /// Register a pre-built integration, replacing any with the same name.
    pub fn insert(&self, integration: Arc<Integration>) {
        let name = integration.name().to_string();
        if self.integrations.insert(name.clone(), integration).is_some() {
            tracing::warn!(integration = %name, "Replaced existing integration");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Integration>> {
        self.integrations.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.integrations.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Status of every integration, sorted by name.
    pub fn status(&self) -> Vec<IntegrationStatus> {
        let mut statuses: Vec<IntegrationStatus> = self
            .integrations
            .iter()
            .map(|entry| {
                let integration = entry.value();
                let breaker = integration.breaker().stats();
                IntegrationStatus {
                    name: integration.name().to_string(),
                    status: ServiceStatus::derive(breaker.state, breaker.error_percentage),
                    state: breaker.state,
                    fires: breaker.fires,
                    error_rate: breaker.error_percentage,
                    mean_latency_ms: breaker.mean_latency_ms,
                    cache_enabled: integration.config().cache_enabled,
                    breaker,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Unhealthy while any circuit is open.
    pub fn health(&self) -> RegistryHealth {
        let open_circuits: Vec<String> = self
            .status()
            .into_iter()
            .filter(|status| status.state == CircuitState::Open)
            .map(|status| status.name)
            .collect();
        RegistryHealth {
            healthy: open_circuits.is_empty(),
            open_circuits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> IntegrationRegistry {
        IntegrationRegistry::from_config(&LayerConfig::default(), None)
    }

    #[test]
    fn test_default_agencies_registered() {
        let registry = registry();
        assert_eq!(
            registry.names(),
            vec!["ANM", "ANP", "CPRM", "Copernicus", "IBAMA", "USGS"]
        );
        let usgs = registry.get("USGS").unwrap();
        assert_eq!(usgs.breaker().config().timeout_ms, 15_000);
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = registry();
        let first = registry.get("ANM").unwrap();
        let second = registry.register(IntegrationConfig::new("ANM"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_and_health() {
        let registry = registry();
        registry.get("IBAMA").unwrap().breaker().force_open();

        let statuses = registry.status();
        let ibama = statuses.iter().find(|s| s.name == "IBAMA").unwrap();
        assert_eq!(ibama.status, ServiceStatus::Down);
        let anm = statuses.iter().find(|s| s.name == "ANM").unwrap();
        assert_eq!(anm.status, ServiceStatus::Operational);

        let health = registry.health();
        assert!(!health.healthy);
        assert_eq!(health.open_circuits, vec!["IBAMA"]);

        registry.get("IBAMA").unwrap().breaker().force_closed();
        assert!(registry.health().healthy);
    }

    #[test]
    fn test_status_derivation() {
        assert_eq!(ServiceStatus::derive(CircuitState::HalfOpen, 0.0), ServiceStatus::Degraded);
        assert_eq!(ServiceStatus::derive(CircuitState::Closed, 25.0), ServiceStatus::Degraded);
        assert_eq!(ServiceStatus::derive(CircuitState::Closed, 10.0), ServiceStatus::Operational);
    }
}
