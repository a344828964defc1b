//! Two-tier cache manager.
//!
//! # Responsibilities
//! - Present L1 + L2 as one cache-aside facade
//! - Promote L2 hits into L1 without outliving the L2 entry
//! - Invalidate by glob pattern across both tiers
//! - Aggregate statistics and health
//!
//! # Data Flow
//! ```text
//! get(key)
//!     → L1 hit?  → return (layer = L1)
//!     → L2 hit?  → promote to L1 (min(L1 TTL, remaining L2 TTL), skipped if unknown) → return (layer = L2)
//!     → miss     → return (layer = MISS)
//!
//! set(key, value, ttl)
//!     → L1 (min(L1 TTL, ttl))
//!     → L2 (ttl, default L2 TTL)
//! ```
//!
//! # Design Decisions
//! - L1 holds `serde_json::Value`; callers pick their type on read
//! - Cache faults never surface: they read as misses
//! - No request coalescing: concurrent misses each compute

use dashmap::DashSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::distributed::{hit_rate, DistributedCache, L2Health, L2Stats, Lookup};
use super::pattern::GlobPattern;
use super::ttl::TtlCache;
use crate::config::MemoryCacheConfig;
use crate::observability::metrics;

const LATENCY_SAMPLES: usize = 1000;
const HEALTH_PROBE_KEY: &str = "__health_check__";

/// Tier that answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheLayer {
    L1,
    L2,
    Miss,
}

impl CacheLayer {
    fn as_str(&self) -> &'static str {
        match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
            Self::Miss => "miss",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
    pub value: Option<T>,
    pub layer: CacheLayer,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct L1Stats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallStats {
    pub total_hits: u64,
    pub total_misses: u64,
    pub hit_rate: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub l1: L1Stats,
    pub l2: Option<L2Stats>,
    pub overall: OverallStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct L1Health {
    pub healthy: bool,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub l1: L1Health,
    pub l2: Option<L2Health>,
    pub overall: bool,
}

#[derive(Debug, Default)]
struct Counters {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.l1_hits.store(0, Ordering::Relaxed);
        self.l1_misses.store(0, Ordering::Relaxed);
        self.l2_hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct ManagerInner {
    config: MemoryCacheConfig,
    l1: TtlCache<Value>,
    l2: Option<Arc<DistributedCache>>,
    counters: Counters,
    latencies: Mutex<VecDeque<f64>>,
    prefetching: DashSet<String>,
}

/// Cheaply cloneable handle to the shared two-tier cache.
#[derive(Debug, Clone)]
pub struct CacheManager {
    inner: Arc<ManagerInner>,
}

impl CacheManager {
    pub fn new(config: MemoryCacheConfig, l2: Option<Arc<DistributedCache>>) -> Self {
        let l2 = if config.enable_l2 { l2 } else { None };
        tracing::info!(
            l1_enabled = config.enable_l1,
            l1_max_size = config.max_size,
            l2_backend = l2.as_ref().map(|c| c.backend_name()).unwrap_or("disabled"),
            "Cache manager initialized"
        );

        Self {
            inner: Arc::new(ManagerInner {
                l1: TtlCache::new(config.max_size, config.ttl()),
                l2,
                config,
                counters: Counters::default(),
                latencies: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLES)),
                prefetching: DashSet::new(),
            }),
        }
    }

    pub fn config(&self) -> &MemoryCacheConfig {
        &self.inner.config
    }

    pub fn l2(&self) -> Option<&Arc<DistributedCache>> {
        self.inner.l2.as_ref()
    }

    fn l1_enabled(&self) -> bool {
        self.inner.config.enable_l1
    }

    /// L1 lifetime for an entry whose L2 lifetime is `ttl`.
    fn l1_ttl(&self, ttl: Option<Duration>) -> Duration {
        let l1 = self.inner.config.ttl();
        ttl.map_or(l1, |ttl| ttl.min(l1))
    }

    fn finish<T>(&self, value: Option<T>, layer: CacheLayer, start: Instant) -> CacheResult<T> {
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        {
            let mut samples = self.inner.latencies.lock().expect("cache latency mutex poisoned");
            if samples.len() == LATENCY_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
        metrics::record_cache_lookup(layer.as_str());
        CacheResult {
            value,
            layer,
            latency_ms,
        }
    }

    /// Look `key` up in L1 then L2.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        let start = Instant::now();
        let counters = &self.inner.counters;

        if self.l1_enabled() {
            if let Some(raw) = self.inner.l1.get(key) {
                match serde_json::from_value::<T>(raw) {
                    Ok(value) => {
                        counters.l1_hits.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(key = %key, "Cache hit (L1)");
                        return self.finish(Some(value), CacheLayer::L1, start);
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "L1 value has unexpected shape, dropping");
                        self.inner.l1.remove(key);
                    }
                }
            }
            counters.l1_misses.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(l2) = &self.inner.l2 {
            let promote = self.l1_enabled() && self.inner.config.promote_to_l1;
            if let Lookup::Hit { value: raw, remaining } = l2.lookup::<Value>(key, promote).await {
                let promoted = match remaining {
                    Some(ttl) if promote => {
                        self.inner.l1.set(key, raw.clone(), Some(self.l1_ttl(Some(ttl))));
                        metrics::record_l1_size(self.inner.l1.size());
                        true
                    }
                    _ => false,
                };
                match serde_json::from_value::<T>(raw) {
                    Ok(value) => {
                        counters.l2_hits.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(key = %key, promoted, "Cache hit (L2)");
                        return self.finish(Some(value), CacheLayer::L2, start);
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "L2 value has unexpected shape");
                        self.inner.l1.remove(key);
                    }
                }
            }
        }

        counters.misses.fetch_add(1, Ordering::Relaxed);
        self.finish(None, CacheLayer::Miss, start)
    }

    /// Write to both tiers. `ttl` defaults to the configured L2 TTL.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Value not cacheable");
                return;
            }
        };
        let ttl = ttl.unwrap_or_else(|| self.inner.config.l2_ttl());

        if self.l1_enabled() {
            self.inner.l1.set(key, json.clone(), Some(self.l1_ttl(Some(ttl))));
            metrics::record_l1_size(self.inner.l1.size());
        }
        if let Some(l2) = &self.inner.l2 {
            if !l2.set(key, &json, Some(ttl)).await {
                tracing::debug!(key = %key, "L2 write skipped or failed");
            }
        }
    }

    /// Return the cached value or compute, cache and return it.
    /// Errors from `compute` propagate and nothing is cached.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &str, compute: F, ttl: Option<Duration>) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key).await.value {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    pub async fn delete(&self, key: &str) -> bool {
        let in_l1 = self.inner.l1.remove(key);
        let in_l2 = match &self.inner.l2 {
            Some(l2) => l2.delete(key).await,
            None => false,
        };
        in_l1 || in_l2
    }

    /// Remove every entry matching the glob from both tiers.
    ///
    /// Returns the number of logical entries removed: the L2 count, or the
    /// L1 count when that is larger (L1-only deployments).
    pub async fn delete_pattern(&self, pattern: &str) -> usize {
        let glob = GlobPattern::new(pattern);
        let from_l1 = self.inner.l1.remove_where(|key| glob.matches(key));
        let from_l2 = match &self.inner.l2 {
            Some(l2) => l2.delete_pattern(pattern).await,
            None => 0,
        };
        let removed = from_l1.max(from_l2);
        tracing::info!(pattern = %pattern, removed, "Cache entries invalidated");
        removed
    }

    pub async fn invalidate<S: AsRef<str>>(&self, patterns: &[S]) -> usize {
        let mut removed = 0;
        for pattern in patterns {
            removed += self.delete_pattern(pattern.as_ref()).await;
        }
        removed
    }

    pub async fn has(&self, key: &str) -> bool {
        if self.l1_enabled() && self.inner.l1.has(key) {
            return true;
        }
        match &self.inner.l2 {
            Some(l2) => l2.has(key).await,
            None => false,
        }
    }

    /// Empty both tiers and reset statistics.
    pub async fn clear(&self) {
        self.inner.l1.clear();
        if let Some(l2) = &self.inner.l2 {
            l2.clear().await;
        }
        self.inner.counters.reset();
        self.inner
            .latencies
            .lock()
            .expect("cache latency mutex poisoned")
            .clear();
        metrics::record_l1_size(0);
        tracing::info!("Cache cleared");
    }

    /// Empty the in-process tier only.
    pub fn clear_l1(&self) {
        self.inner.l1.clear();
        metrics::record_l1_size(0);
    }

    /// Preload entries into both tiers. Returns how many were written.
    pub async fn warm_cache<T: Serialize>(&self, entries: Vec<(String, T, Option<Duration>)>) -> usize {
        let count = entries.len();
        for (key, value, ttl) in entries {
            self.set(&key, &value, ttl).await;
        }
        tracing::info!(entries = count, "Cache warmed");
        count
    }

    /// Pull `keys` from L2 into L1 ahead of use. Keys already in L1 or being
    /// prefetched by another caller are skipped. Returns how many were loaded.
    pub async fn prefetch<S: AsRef<str>>(&self, keys: &[S]) -> usize {
        let Some(l2) = self.inner.l2.as_ref() else {
            return 0;
        };
        if !self.l1_enabled() {
            return 0;
        }

        let mut loaded = 0;
        for key in keys {
            let key = key.as_ref();
            if self.inner.l1.has(key) || !self.inner.prefetching.insert(key.to_string()) {
                continue;
            }
            if let Lookup::Hit {
                value,
                remaining: Some(ttl),
            } = l2.lookup::<Value>(key, true).await
            {
                self.inner.l1.set(key, value, Some(self.l1_ttl(Some(ttl))));
                loaded += 1;
            }
            self.inner.prefetching.remove(key);
        }

        metrics::record_l1_size(self.inner.l1.size());
        tracing::debug!(requested = keys.len(), loaded, "Prefetch complete");
        loaded
    }

    pub async fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        let l1_hits = counters.l1_hits.load(Ordering::Relaxed);
        let l1_misses = counters.l1_misses.load(Ordering::Relaxed);
        let l2_hits = counters.l2_hits.load(Ordering::Relaxed);
        let misses = counters.misses.load(Ordering::Relaxed);

        let avg_latency_ms = {
            let samples = self.inner.latencies.lock().expect("cache latency mutex poisoned");
            if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            }
        };

        let l2 = match &self.inner.l2 {
            Some(l2) => Some(l2.stats().await),
            None => None,
        };

        let total_hits = l1_hits + l2_hits;
        CacheStats {
            l1: L1Stats {
                hits: l1_hits,
                misses: l1_misses,
                hit_rate: hit_rate(l1_hits, l1_misses),
                size: self.inner.l1.size(),
                max_size: self.inner.l1.max_size(),
            },
            l2,
            overall: OverallStats {
                total_hits,
                total_misses: misses,
                hit_rate: hit_rate(total_hits, misses),
                avg_latency_ms,
            },
        }
    }

    /// Probe L1 with a write/read and ping L2. The L1 probe is skipped when
    /// L1 is disabled or full, so it never evicts a live entry.
    pub async fn health_check(&self) -> CacheHealth {
        let l1 = &self.inner.l1;
        let l1_healthy = if !self.l1_enabled() || l1.size() >= l1.max_size() {
            true
        } else {
            let probe = Value::Bool(true);
            l1.set(HEALTH_PROBE_KEY, probe.clone(), Some(Duration::from_secs(1)));
            let healthy = l1.get(HEALTH_PROBE_KEY).as_ref() == Some(&probe);
            l1.remove(HEALTH_PROBE_KEY);
            healthy
        };
        metrics::record_backend_health("l1_cache", l1_healthy);

        let l2 = match &self.inner.l2 {
            Some(l2) => Some(l2.health_check().await),
            None => None,
        };
        let overall = l1_healthy && l2.as_ref().map_or(true, |h| h.healthy);

        CacheHealth {
            l1: L1Health {
                healthy: l1_healthy,
                size: self.inner.l1.size(),
            },
            l2,
            overall,
        }
    }

    /// Close the distributed tier.
    pub async fn disconnect(&self) {
        if let Some(l2) = &self.inner.l2 {
            l2.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use crate::config::RedisConfig;
    use serde_json::json;

    fn manager() -> CacheManager {
        let l2 = DistributedCache::new(Arc::new(MemoryStore::new()), RedisConfig::default());
        CacheManager::new(MemoryCacheConfig::default(), Some(Arc::new(l2)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_from_l1() {
        let cache = manager();
        cache.set("report:1", &json!({"status": "ok"}), Some(Duration::from_secs(60))).await;

        let result = cache.get::<Value>("report:1").await;
        assert_eq!(result.layer, CacheLayer::L1);
        assert_eq!(result.value, Some(json!({"status": "ok"})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_respects_remaining_l2_lifetime() {
        let cache = manager();
        cache.set("k", &7u32, Some(Duration::from_secs(100))).await;
        tokio::time::advance(Duration::from_secs(90)).await;
        cache.clear_l1();

        assert_eq!(cache.get::<u32>("k").await.layer, CacheLayer::L2);
        assert_eq!(cache.get::<u32>("k").await.layer, CacheLayer::L1);

        // Promoted with the ~10s left in L2, not the 300s L1 default.
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get::<u32>("k").await.layer, CacheLayer::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_with_sub_second_l2_lifetime() {
        let cache = manager();
        cache.set("k", &7u32, Some(Duration::from_secs(5))).await;
        tokio::time::advance(Duration::from_millis(4_500)).await;
        cache.clear_l1();

        assert_eq!(cache.get::<u32>("k").await.layer, CacheLayer::L2);

        tokio::time::advance(Duration::from_secs(60)).await;
        let result = cache.get::<u32>("k").await;
        assert_eq!(result.layer, CacheLayer::Miss);
        assert_eq!(result.value, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_compute_caches_success_only() {
        let cache = manager();

        let first: Result<u32, &str> = cache.get_or_compute("n", || async { Ok(1) }, None).await;
        let second: Result<u32, &str> = cache.get_or_compute("n", || async { Ok(2) }, None).await;
        assert_eq!((first, second), (Ok(1), Ok(1)));

        let failed: Result<u32, &str> = cache.get_or_compute("e", || async { Err("boom") }, None).await;
        assert_eq!(failed, Err("boom"));
        assert!(!cache.has("e").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_pattern_spans_tiers() {
        let cache = manager();
        for id in 1..=3 {
            cache.set(&format!("integration:ANM:{id}"), &id, None).await;
        }
        cache.set("integration:USGS:1", &1, None).await;

        assert_eq!(cache.invalidate(&["integration:ANM:*"]).await, 3);
        assert!(!cache.has("integration:ANM:2").await);
        assert!(cache.has("integration:USGS:1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_l1_only_manager() {
        let config = MemoryCacheConfig {
            enable_l2: false,
            ..MemoryCacheConfig::default()
        };
        let cache = CacheManager::new(config, None);
        cache.set("a", "x", None).await;

        assert_eq!(cache.get::<String>("a").await.value.as_deref(), Some("x"));
        assert_eq!(cache.delete_pattern("a*").await, 1);
        assert_eq!(cache.prefetch(&["a"]).await, 0);
        assert!(cache.health_check().await.overall);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_and_stats() {
        let cache = manager();
        cache.set("p1", &1, None).await;
        cache.set("p2", &2, None).await;
        cache.clear_l1();

        assert_eq!(cache.prefetch(&["p1", "p2", "absent"]).await, 2);
        assert_eq!(cache.get::<i32>("p1").await.layer, CacheLayer::L1);
        assert_eq!(cache.get::<i32>("absent").await.layer, CacheLayer::Miss);

        let stats = cache.stats().await;
        assert_eq!(stats.l1.hits, 1);
        assert_eq!(stats.overall.total_misses, 1);
        assert_eq!(stats.l1.size, 2);
        assert_eq!(stats.l2.map(|s| s.total_keys), Some(2));

        cache.clear().await;
        let stats = cache.stats().await;
        assert_eq!((stats.l1.size, stats.overall.total_hits), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_cache() {
        let cache = manager();
        let warmed = cache
            .warm_cache(vec![
                ("agency:ANM".to_string(), json!({"up": true}), None),
                ("agency:USGS".to_string(), json!({"up": false}), Some(Duration::from_secs(5))),
            ])
            .await;
        assert_eq!(warmed, 2);
        assert!(cache.has("agency:USGS").await);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!cache.has("agency:USGS").await);
        assert!(cache.has("agency:ANM").await);
    }
}
