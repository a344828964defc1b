//! External service integrations.
//!
//! # Data Flow
//! ```text
//! business code
//!     → IntegrationRegistry::get(name)   (registry.rs)
//!     → Integration::call / wrap         (wrapper.rs)
//!         → cache key                    (key.rs)
//!         → cache → breaker → retries → service
//! ```
//!
//! # Design Decisions
//! - One breaker per service; a failing agency never trips another's circuit
//! - Callers get `IntegrationError`, never breaker or retry types

pub mod key;
pub mod registry;
pub mod wrapper;

pub use key::cache_key;
pub use registry::{IntegrationRegistry, IntegrationStatus, RegistryHealth, ServiceStatus};
pub use wrapper::{BoxError, Integration, IntegrationError, WrappedIntegration};
