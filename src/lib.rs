//! Resilient integration layer for external compliance data sources.
//!
//! Two-tier caching (in-process L1, Redis-backed L2) and per-service
//! circuit breakers with retry, wrapped around calls to agency APIs.

pub mod admin;
pub mod cache;
pub mod config;
pub mod integrations;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use cache::CacheManager;
pub use config::LayerConfig;
pub use integrations::{Integration, IntegrationError};
pub use lifecycle::{IntegrationLayer, Shutdown};
pub use resilience::CircuitBreaker;
