//! Caching subsystem.
//!
//! # Data Flow
//! ```text
//! CacheManager (manager.rs)
//!     → TtlCache (ttl.rs)              in-process, LRU + TTL
//!     → DistributedCache (distributed.rs)
//!         → codec.rs                   JSON, gzip above threshold
//!         → KvStore (store.rs)         Redis or in-memory substitute
//! ```
//!
//! # Design Decisions
//! - Caching is never a single point of failure: faults read as misses
//! - Glob semantics (pattern.rs) are shared by L1 invalidation and the
//!   in-memory store so both tiers agree on what a pattern matches

pub mod codec;
pub mod distributed;
pub mod manager;
pub mod pattern;
pub mod store;
pub mod ttl;

pub use distributed::{CacheMetadata, DistributedCache, L2Health, L2Stats, Lookup};
pub use manager::{CacheHealth, CacheLayer, CacheManager, CacheResult, CacheStats};
pub use pattern::GlobPattern;
pub use store::{KvStore, MemoryStore, RedisStore, StoreError};
pub use ttl::TtlCache;
