//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Select L2 store → CacheManager → IntegrationRegistry
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Trigger → admin server drains → IntegrationLayer::shutdown (close L2)
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then caches, then integrations
//! - An unreachable Redis degrades to the in-memory store, never a fatal error
//! - Shutdown has a timeout: forced exit after the deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::IntegrationLayer;
