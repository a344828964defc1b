//! In-process TTL cache (L1).
//!
//! # Responsibilities
//! - Bounded key → value store with per-entry expiry
//! - Least-recently-used eviction once `max_size` is reached
//!
//! # Design Decisions
//! - Expiry is lazy: an expired entry is removed when it is next touched
//! - `get` refreshes recency; `has` does not
//! - Recency is a monotonically increasing tick, indexed by a BTreeMap so
//!   the victim is found in O(log n)
//! - One std mutex; nothing inside it awaits

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
    tick: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl<V> Inner<V> {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    /// Drop the entry if it has expired; returns true when it is still live.
    fn live(&mut self, key: &str, now: Instant) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => true,
            Some(_) => {
                self.remove(key);
                false
            }
            None => false,
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    fn evict_lru(&mut self) {
        if let Some((_, key)) = self.recency.pop_first() {
            self.entries.remove(&key);
            tracing::trace!(key = %key, "Evicted least recently used entry");
        }
    }
}

/// Bounded TTL cache with LRU eviction.
#[derive(Debug)]
pub struct TtlCache<V> {
    max_size: usize,
    default_ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            default_ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
            }),
        }
    }

    /// Insert or replace `key`. `ttl` overrides the default lifetime.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        let mut inner = self.lock();

        inner.remove(&key);
        if inner.entries.len() >= self.max_size {
            inner.purge_expired(Instant::now());
        }
        while inner.entries.len() >= self.max_size {
            inner.evict_lru();
        }

        let tick = inner.bump();
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                tick,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        if !inner.live(key, Instant::now()) {
            return None;
        }

        let tick = inner.bump();
        let entry = inner.entries.get_mut(key)?;
        let old_tick = std::mem::replace(&mut entry.tick, tick);
        let value = entry.value.clone();
        inner.recency.remove(&old_tick);
        inner.recency.insert(tick, key.to_string());
        Some(value)
    }

    pub fn has(&self, key: &str) -> bool {
        self.lock().live(key, Instant::now())
    }

    /// Remaining lifetime of a live entry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut inner = self.lock();
        if !inner.live(key, now) {
            return None;
        }
        inner.entries.get(key).map(|entry| entry.expires_at - now)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Remove every key matching `predicate`; returns the number removed.
    pub fn remove_where(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut inner = self.lock();
        let doomed: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        for key in &doomed {
            inner.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    /// Number of live entries.
    pub fn size(&self) -> usize {
        let mut inner = self.lock();
        inner.purge_expired(Instant::now());
        inner.entries.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        self.inner.lock().expect("ttl cache mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_lazily() {
        let cache = TtlCache::new(10, Duration::from_secs(5));
        cache.set("a", 1, None);
        cache.set("b", 2, Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(cache.get("a"), Some(1));
        assert!(!cache.has("b"));
        assert_eq!(cache.get("b"), None);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_keeps_recently_read() {
        let cache = TtlCache::new(3, Duration::from_secs(60));
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("c", 3, None);

        assert_eq!(cache.get("a"), Some(1));
        cache.set("d", 4, None);

        assert_eq!(cache.size(), 3);
        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert!(cache.has("d"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_make_room_before_eviction() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.set("short", 1, Some(Duration::from_secs(1)));
        cache.set("long", 2, None);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.set("new", 3, None);

        assert!(cache.has("long"));
        assert!(cache.has("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_does_not_grow() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        cache.set("a", 1, None);
        cache.set("a", 2, None);
        cache.set("b", 3, None);

        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get("a"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_where_and_ttl() {
        let cache = TtlCache::new(10, Duration::from_secs(60));
        cache.set("integration:ANM:1", 1, None);
        cache.set("integration:ANM:2", 2, None);
        cache.set("integration:USGS:1", 3, Some(Duration::from_secs(10)));

        assert_eq!(cache.remove_where(|k| k.starts_with("integration:ANM")), 2);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.ttl("integration:USGS:1"), Some(Duration::from_secs(10)));
        assert!(cache.remove("integration:USGS:1"));
        assert!(!cache.remove("integration:USGS:1"));
    }
}
