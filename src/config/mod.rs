//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (REDIS_* environment overrides)
//!     → validation.rs (semantic checks)
//!     → LayerConfig (validated, immutable)
//!     → handed to lifecycle::startup to build the layer
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Missing Redis settings select the in-memory L2 store, never an error

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::LayerConfig;
pub use schema::MemoryCacheConfig;
pub use schema::RedisConfig;
pub use schema::CircuitBreakerConfig;
pub use schema::IntegrationConfig;
pub use schema::ObservabilityConfig;
pub use schema::AdminConfig;
