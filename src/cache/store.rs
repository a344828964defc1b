//! Key-value backends for the distributed tier.
//!
//! # Responsibilities
//! - Define the small command surface the L2 client needs (`KvStore`)
//! - Speak it to Redis through a multiplexed `ConnectionManager`
//! - Provide an in-memory substitute with the same TTL and glob semantics
//!
//! # Design Decisions
//! - Backends return errors; policy (miss/false on error) lives in the L2 client
//! - TTL replies follow Redis: -2 missing key, -1 no expiry
//! - The in-memory store expires lazily, like the L1 cache

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::pattern::GlobPattern;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connection to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },

    #[error("Store is disconnected")]
    Disconnected,
}

/// TTL reply for a key without expiry.
pub const TTL_PERSISTENT: i64 = -1;
/// TTL reply for a missing key.
pub const TTL_MISSING: i64 = -2;

/// Commands the distributed cache client issues.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// `SETEX key ttl value`.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// `SET key value KEEPTTL`; used to rewrite metadata without touching expiry.
    async fn set_keep_ttl(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining lifetime in seconds, or [`TTL_PERSISTENT`] / [`TTL_MISSING`].
    async fn ttl(&self, key: &str) -> Result<i64, StoreError>;

    /// `PTTL`: remaining lifetime in milliseconds, with the same negative replies.
    async fn pttl(&self, key: &str) -> Result<i64, StoreError>;

    /// Set a new lifetime; false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Raw `INFO memory` style text.
    async fn memory_info(&self) -> Result<String, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Release connections; later calls fail with [`StoreError::Disconnected`].
    async fn close(&self);

    fn backend_name(&self) -> &'static str;
}

/// Redis backend.
pub struct RedisStore {
    connection: tokio::sync::RwLock<Option<redis::aio::ConnectionManager>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    /// Connect, failing if the server is not reachable within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let manager = tokio::time::timeout(timeout, redis::aio::ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::ConnectTimeout {
                url: redact_url(url),
                timeout,
            })??;

        tracing::info!(url = %redact_url(url), "Connected to Redis");
        Ok(Self {
            connection: tokio::sync::RwLock::new(Some(manager)),
        })
    }

    async fn conn(&self) -> Result<redis::aio::ConnectionManager, StoreError> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(StoreError::Disconnected)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_keep_ttl(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let found: bool = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(found)
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn().await?;
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        Ok(ttl)
    }

    async fn pttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn().await?;
        let ttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(ttl)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let applied: bool = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(applied)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let keys: Vec<String> = redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await?;
        Ok(keys)
    }

    async fn memory_info(&self) -> Result<String, StoreError> {
        let mut conn = self.conn().await?;
        let info: String = redis::cmd("INFO").arg("memory").query_async(&mut conn).await?;
        Ok(info)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) {
        if self.connection.write().await.take().is_some() {
            tracing::info!("Redis connection closed");
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory backend used when Redis is not configured or unreachable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<StoredValue> {
        let now = Instant::now();
        let value = self.entries.get(key).map(|entry| entry.clone())?;
        if value.is_expired(now) {
            self.entries.remove(key);
            return None;
        }
        Some(value)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.live(key).map(|value| value.bytes))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let ttl = ttl.max(Duration::from_secs(1));
        self.entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_keep_ttl(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let expires_at = self.live(key).and_then(|existing| existing.expires_at);
        self.entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, value)| !value.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        Ok(match self.live(key) {
            None => TTL_MISSING,
            Some(StoredValue {
                expires_at: None, ..
            }) => TTL_PERSISTENT,
            Some(StoredValue {
                expires_at: Some(at),
                ..
            }) => at.saturating_duration_since(now).as_secs() as i64,
        })
    }

    async fn pttl(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        Ok(match self.live(key) {
            None => TTL_MISSING,
            Some(StoredValue {
                expires_at: None, ..
            }) => TTL_PERSISTENT,
            Some(StoredValue {
                expires_at: Some(at),
                ..
            }) => at.saturating_duration_since(now).as_millis() as i64,
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        if self.live(key).is_none() {
            return Ok(false);
        }
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let glob = GlobPattern::new(pattern);
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now) && glob.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn memory_info(&self) -> Result<String, StoreError> {
        let used: usize = self
            .entries
            .iter()
            .map(|entry| entry.key().len() + entry.value().bytes.len())
            .sum();
        Ok(format!("# Memory\r\nused_memory:{used}\r\nused_memory_human:{used}B\r\n"))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn close(&self) {
        self.entries.clear();
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Redact credentials from a Redis URL for logging.
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<invalid url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_expiry_and_ttl() {
        let store = MemoryStore::new();
        store.set_ex("k", b"v", Duration::from_secs(10)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.ttl("k").await.unwrap(), 10);
        assert_eq!(store.ttl("absent").await.unwrap(), TTL_MISSING);

        tokio::time::advance(Duration::from_millis(9_500)).await;
        assert_eq!(store.ttl("k").await.unwrap(), 0);
        assert_eq!(store.pttl("k").await.unwrap(), 500);
        assert_eq!(store.pttl("absent").await.unwrap(), TTL_MISSING);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_keep_ttl_and_expire() {
        let store = MemoryStore::new();
        store.set_ex("k", b"1", Duration::from_secs(30)).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        store.set_keep_ttl("k", b"2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.ttl("k").await.unwrap(), 20);

        assert!(store.expire("k", Duration::from_secs(100)).await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), 100);
        assert!(!store.expire("absent", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_keys_and_del() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_ex("compliance:a", b"1", ttl).await.unwrap();
        store.set_ex("compliance:a:meta", b"{}", ttl).await.unwrap();
        store.set_ex("other:b", b"2", ttl).await.unwrap();

        let mut keys = store.keys("compliance:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["compliance:a", "compliance:a:meta"]);

        let removed = store
            .del(&["compliance:a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.memory_info().await.unwrap().contains("used_memory:"));
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("redis://:secret@cache.internal:6379/0"),
            "redis://:***@cache.internal:6379/0"
        );
        assert_eq!(redact_url("redis://localhost:6379"), "redis://localhost:6379");
    }
}
