//! Distributed cache client (L2).
//!
//! # Responsibilities
//! - Prefix keys and keep a `<key>:meta` sidecar with the same TTL
//! - Encode values (JSON, gzip above the threshold)
//! - Protect itself with a consecutive-error guard
//! - Track hits, misses, errors and response times
//!
//! # Data Flow
//! ```text
//! get(key)
//!     → guard open? → miss
//!     → GET <prefix><key>            (absent → miss)
//!     → GET <prefix><key>:meta       (advisory: compressed flag, hit count)
//!     → decode                       (corrupt → miss for this key only)
//!     → SET <prefix><key>:meta KEEPTTL (hits + 1, last_accessed)
//! ```
//!
//! # Design Decisions
//! - Every public operation swallows backend errors and returns a safe
//!   default (miss, false, 0); `lookup` keeps the distinction internally
//! - The guard opens after `guard_threshold` consecutive backend errors and
//!   short-circuits everything for `guard_timeout`; any successful round
//!   trip closes it
//! - Metadata is never load-bearing: a value without sidecar still decodes

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

use super::codec;
use super::store::{KvStore, StoreError, TTL_MISSING, TTL_PERSISTENT};
use crate::config::RedisConfig;
use crate::observability::metrics;

const META_SUFFIX: &str = ":meta";
const RESPONSE_SAMPLES: usize = 100;

/// Sidecar record stored next to every value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub key: String,
    /// JSON size before compression.
    pub size: usize,
    pub compressed: bool,
    /// Epoch milliseconds.
    pub created_at: u64,
    pub expires_at: u64,
    pub hits: u64,
    pub last_accessed: u64,
}

/// Result of an L2 read, before errors are collapsed into misses.
#[derive(Debug)]
pub enum Lookup<T> {
    Hit {
        value: T,
        /// Remaining lifetime when requested and known. `None` means the
        /// entry must not be copied into a shorter-lived tier.
        remaining: Option<Duration>,
    },
    Miss,
    BackendError,
}

impl<T> Lookup<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Lookup::Hit { value, .. } => Some(value),
            Lookup::Miss | Lookup::BackendError => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct L2Stats {
    pub backend: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub error_count: u64,
    pub avg_response_ms: f64,
    pub total_keys: usize,
    pub memory_usage: String,
    pub guard_open: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct L2Health {
    pub healthy: bool,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Consecutive-error guard.
#[derive(Debug)]
struct Guard {
    threshold: u32,
    timeout: Duration,
    consecutive_errors: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl Guard {
    fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            timeout,
            consecutive_errors: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    /// False while the guard is open; closes it once the timeout has passed.
    fn allow(&self) -> bool {
        let mut opened_at = self.opened_at.lock().expect("l2 guard mutex poisoned");
        match *opened_at {
            Some(at) if at.elapsed() < self.timeout => false,
            Some(_) => {
                *opened_at = None;
                self.consecutive_errors.store(0, Ordering::Relaxed);
                tracing::info!("L2 guard timeout elapsed, retrying backend");
                true
            }
            None => true,
        }
    }

    fn is_open(&self) -> bool {
        let opened_at = self.opened_at.lock().expect("l2 guard mutex poisoned");
        opened_at.is_some_and(|at| at.elapsed() < self.timeout)
    }

    fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::Relaxed);
        let mut opened_at = self.opened_at.lock().expect("l2 guard mutex poisoned");
        if opened_at.take().is_some() {
            tracing::info!("L2 guard closed");
        }
    }

    fn record_failure(&self) {
        let errors = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
        if errors < self.threshold {
            return;
        }
        let mut opened_at = self.opened_at.lock().expect("l2 guard mutex poisoned");
        if opened_at.is_none() {
            *opened_at = Some(Instant::now());
            tracing::error!(
                consecutive_errors = errors,
                timeout_secs = self.timeout.as_secs(),
                "L2 guard opened, short-circuiting distributed cache"
            );
        }
    }
}

/// L2 client over any [`KvStore`].
#[derive(Debug)]
pub struct DistributedCache {
    store: Arc<dyn KvStore>,
    config: RedisConfig,
    guard: Guard,
    connected: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    response_times: Mutex<VecDeque<f64>>,
}

impl DistributedCache {
    pub fn new(store: Arc<dyn KvStore>, config: RedisConfig) -> Self {
        Self {
            guard: Guard::new(config.guard_threshold, config.guard_timeout()),
            store,
            config,
            connected: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            response_times: Mutex::new(VecDeque::with_capacity(RESPONSE_SAMPLES)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn meta_key(&self, key: &str) -> String {
        format!("{}{}{}", self.config.key_prefix, key, META_SUFFIX)
    }

    fn available(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && self.guard.allow()
    }

    fn on_error(&self, op: &'static str, key: &str, error: &StoreError, start: Instant) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.guard.record_failure();
        metrics::record_l2_operation(op, false, start.elapsed());
        tracing::warn!(op, key = %key, error = %error, "L2 operation failed");
    }

    fn on_success(&self, op: &'static str, start: Instant) {
        let elapsed = start.elapsed();
        self.guard.record_success();
        metrics::record_l2_operation(op, true, elapsed);

        let mut samples = self.response_times.lock().expect("l2 stats mutex poisoned");
        if samples.len() == RESPONSE_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    /// Read `key`, keeping backend errors distinguishable from misses.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str, want_ttl: bool) -> Lookup<T> {
        if !self.available() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Lookup::BackendError;
        }

        let start = Instant::now();
        let full_key = self.full_key(key);
        let bytes = match self.store.get(&full_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.on_success("get", start);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Lookup::Miss;
            }
            Err(e) => {
                self.on_error("get", key, &e, start);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Lookup::BackendError;
            }
        };

        let meta = self.read_metadata(key).await;
        let value = match codec::decode::<T>(&bytes, meta.as_ref().map(|m| m.compressed)) {
            Ok(value) => value,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Failed to decode cached value");
                return Lookup::Miss;
            }
        };

        let meta_expired = meta
            .as_ref()
            .is_some_and(|m| m.expires_at <= epoch_millis());
        if let Some(meta) = meta {
            self.touch_metadata(key, meta).await;
        }

        let remaining = if want_ttl && !meta_expired {
            match self.store.pttl(&full_key).await {
                Ok(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
                Ok(TTL_PERSISTENT) => Some(Duration::MAX),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "Failed to read remaining TTL");
                    None
                }
            }
        } else {
            None
        };

        self.on_success("get", start);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Lookup::Hit { value, remaining }
    }

    /// Read `key`; backend errors and corrupt entries read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key, false).await.into_value()
    }

    async fn read_metadata(&self, key: &str) -> Option<CacheMetadata> {
        match self.store.get(&self.meta_key(key)).await {
            Ok(Some(raw)) => serde_json::from_slice(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Metadata read failed");
                None
            }
        }
    }

    async fn touch_metadata(&self, key: &str, mut meta: CacheMetadata) {
        meta.hits += 1;
        meta.last_accessed = epoch_millis();
        let Ok(raw) = serde_json::to_vec(&meta) else {
            return;
        };
        if let Err(e) = self.store.set_keep_ttl(&self.meta_key(key), &raw).await {
            tracing::debug!(key = %key, error = %e, "Metadata update failed");
        }
    }

    /// Store `value` for `ttl` (default TTL when `None`). False on any failure.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        if !self.available() {
            return false;
        }

        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let encoded = match codec::encode(
            value,
            self.config.enable_compression,
            self.config.compression_threshold,
        ) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Failed to encode value for L2");
                return false;
            }
        };

        let start = Instant::now();
        if let Err(e) = self.store.set_ex(&self.full_key(key), &encoded.bytes, ttl).await {
            self.on_error("set", key, &e, start);
            return false;
        }

        let now = epoch_millis();
        let meta = CacheMetadata {
            key: key.to_string(),
            size: encoded.original_size,
            compressed: encoded.compressed,
            created_at: now,
            expires_at: now + ttl.as_millis() as u64,
            hits: 0,
            last_accessed: now,
        };
        match serde_json::to_vec(&meta) {
            Ok(raw) => {
                if let Err(e) = self.store.set_ex(&self.meta_key(key), &raw, ttl).await {
                    self.on_error("set_meta", key, &e, start);
                    return true;
                }
            }
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to encode metadata"),
        }

        self.on_success("set", start);
        tracing::debug!(
            key = %key,
            ttl_secs = ttl.as_secs(),
            size = encoded.original_size,
            compressed = encoded.compressed,
            "L2 set"
        );
        true
    }

    /// Remove a value and its sidecar. True when the value existed.
    pub async fn delete(&self, key: &str) -> bool {
        if !self.available() {
            return false;
        }
        let start = Instant::now();
        match self.store.del(&[self.full_key(key), self.meta_key(key)]).await {
            Ok(removed) => {
                self.on_success("delete", start);
                removed > 0
            }
            Err(e) => {
                self.on_error("delete", key, &e, start);
                false
            }
        }
    }

    /// Remove every value whose key matches `pattern`, with its sidecar.
    /// Returns the number of values removed.
    pub async fn delete_pattern(&self, pattern: &str) -> usize {
        if !self.available() {
            return 0;
        }
        let start = Instant::now();
        let matched = match self.store.keys(&self.full_key(pattern)).await {
            Ok(keys) => keys,
            Err(e) => {
                self.on_error("delete_pattern", pattern, &e, start);
                return 0;
            }
        };

        let mut doomed = Vec::with_capacity(matched.len() * 2);
        let mut values = 0;
        for key in matched {
            if !key.ends_with(META_SUFFIX) {
                values += 1;
                doomed.push(format!("{key}{META_SUFFIX}"));
            }
            doomed.push(key);
        }
        doomed.sort();
        doomed.dedup();

        match self.store.del(&doomed).await {
            Ok(_) => {
                self.on_success("delete_pattern", start);
                tracing::debug!(pattern = %pattern, deleted = values, "L2 pattern delete");
                values
            }
            Err(e) => {
                self.on_error("delete_pattern", pattern, &e, start);
                0
            }
        }
    }

    pub async fn has(&self, key: &str) -> bool {
        if !self.available() {
            return false;
        }
        let start = Instant::now();
        match self.store.exists(&self.full_key(key)).await {
            Ok(found) => {
                self.on_success("exists", start);
                found
            }
            Err(e) => {
                self.on_error("exists", key, &e, start);
                false
            }
        }
    }

    /// Remaining lifetime in seconds; -1 without expiry, -2 when absent or on error.
    pub async fn ttl(&self, key: &str) -> i64 {
        if !self.available() {
            return TTL_MISSING;
        }
        let start = Instant::now();
        match self.store.ttl(&self.full_key(key)).await {
            Ok(ttl) => {
                self.on_success("ttl", start);
                ttl
            }
            Err(e) => {
                self.on_error("ttl", key, &e, start);
                TTL_MISSING
            }
        }
    }

    /// Reset the lifetime of a value and its sidecar.
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        if !self.available() {
            return false;
        }
        let start = Instant::now();
        let applied = match self.store.expire(&self.full_key(key), ttl).await {
            Ok(applied) => applied,
            Err(e) => {
                self.on_error("expire", key, &e, start);
                return false;
            }
        };
        if applied {
            if let Err(e) = self.store.expire(&self.meta_key(key), ttl).await {
                tracing::debug!(key = %key, error = %e, "Metadata expire failed");
            }
        }
        self.on_success("expire", start);
        applied
    }

    /// Remove every prefixed key and reset the hit/miss counters.
    pub async fn clear(&self) -> bool {
        if !self.available() {
            return false;
        }
        let start = Instant::now();
        let keys = match self.store.keys(&self.full_key("*")).await {
            Ok(keys) => keys,
            Err(e) => {
                self.on_error("clear", "*", &e, start);
                return false;
            }
        };
        if let Err(e) = self.store.del(&keys).await {
            self.on_error("clear", "*", &e, start);
            return false;
        }

        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.on_success("clear", start);
        tracing::info!(removed = keys.len(), "L2 cache cleared");
        true
    }

    pub async fn stats(&self) -> L2Stats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let avg_response_ms = {
            let samples = self.response_times.lock().expect("l2 stats mutex poisoned");
            if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            }
        };

        let (total_keys, memory_usage) = if self.available() {
            let total_keys = match self.store.keys(&self.full_key("*")).await {
                Ok(keys) => keys.iter().filter(|k| !k.ends_with(META_SUFFIX)).count(),
                Err(e) => {
                    tracing::debug!(error = %e, "Key scan for stats failed");
                    0
                }
            };
            let memory_usage = match self.store.memory_info().await {
                Ok(info) => parse_used_memory(&info),
                Err(e) => {
                    tracing::debug!(error = %e, "Memory info for stats failed");
                    "unknown".to_string()
                }
            };
            (total_keys, memory_usage)
        } else {
            (0, "unknown".to_string())
        };

        L2Stats {
            backend: self.store.backend_name(),
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            error_count: self.errors.load(Ordering::Relaxed),
            avg_response_ms,
            total_keys,
            memory_usage,
            guard_open: self.guard.is_open(),
        }
    }

    /// Round-trip the backend, bypassing the guard. Success closes the guard.
    pub async fn health_check(&self) -> L2Health {
        if !self.connected.load(Ordering::Relaxed) {
            return L2Health {
                healthy: false,
                latency_ms: 0.0,
                error: Some(StoreError::Disconnected.to_string()),
            };
        }

        let start = Instant::now();
        let result = self.store.ping().await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let healthy = result.is_ok();
        metrics::record_backend_health("l2_cache", healthy);

        match result {
            Ok(()) => {
                self.on_success("ping", start);
                L2Health {
                    healthy: true,
                    latency_ms,
                    error: None,
                }
            }
            Err(e) => {
                self.on_error("ping", "-", &e, start);
                L2Health {
                    healthy: false,
                    latency_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Connected and not short-circuited.
    pub fn is_ready(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && !self.guard.is_open()
    }

    pub async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            self.store.close().await;
            tracing::info!(backend = self.store.backend_name(), "L2 cache disconnected");
        }
    }
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Pick the human-readable figure out of `INFO memory`, falling back to bytes.
fn parse_used_memory(info: &str) -> String {
    let field = |name: &str| {
        info.lines()
            .find_map(|line| line.strip_prefix(name))
            .map(|value| value.trim().to_string())
    };
    field("used_memory_human:")
        .or_else(|| field("used_memory:"))
        .unwrap_or_else(|| "unknown".to_string())
}
