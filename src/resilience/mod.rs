//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Wrapped integration call:
//!     → circuit_breaker.rs (admit or reject; race the single deadline)
//!         → timeouts.rs (deadline covering the whole retry loop)
//!         → retries.rs (re-invoke with backoff.rs delays)
//!     → rolling.rs (one outcome per outer call)
//!     → events.rs (transition notifications for subscribers)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries happen inside the breaker, so the breaker sees one outcome per call
//! - Circuit breaker prevents cascading failures across integrations

pub mod backoff;
pub mod circuit_breaker;
pub mod events;
pub mod retries;
pub mod rolling;
pub mod timeouts;

pub use circuit_breaker::{BreakerError, BreakerStats, CircuitBreaker, CircuitState, Guarded};
pub use events::{BreakerEvent, BreakerEventKind};
pub use retries::{retry_with_backoff, RetriesExhausted, RetryPolicy};
