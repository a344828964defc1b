//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! integration layer. All types derive Serde traits for deserialization from
//! config files, and every section falls back to documented defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the integration layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LayerConfig {
    /// In-process cache (L1) and tier orchestration settings.
    pub memory: MemoryCacheConfig,

    /// Distributed cache (L2) settings.
    pub redis: RedisConfig,

    /// Circuit breaker defaults applied to every integration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// One entry per external service.
    pub integrations: Vec<IntegrationConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            memory: MemoryCacheConfig::default(),
            redis: RedisConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            integrations: IntegrationConfig::agency_defaults(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// L1 cache and cache manager configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryCacheConfig {
    /// Maximum number of in-process entries.
    pub max_size: usize,

    /// Lifetime of an in-process entry in seconds.
    pub ttl_secs: u64,

    /// TTL applied to L2 writes that do not specify one.
    pub l2_ttl_secs: u64,

    /// Use the in-process tier.
    pub enable_l1: bool,

    /// Use the distributed tier.
    pub enable_l2: bool,

    /// Copy L2 hits into L1.
    pub promote_to_l1: bool,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_secs: 300,
            l2_ttl_secs: 3600,
            enable_l1: true,
            enable_l2: true,
            promote_to_l1: true,
        }
    }
}

impl MemoryCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_secs)
    }
}

/// Distributed cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Full connection URL; overrides host/port/password/db when set.
    pub url: Option<String>,

    /// Server host. When neither `url` nor `host` is set the in-memory
    /// fallback store is used.
    pub host: Option<String>,

    /// Server port.
    pub port: u16,

    /// Optional AUTH password.
    pub password: Option<String>,

    /// Logical database index.
    pub db: i64,

    /// Prefix prepended to every key.
    pub key_prefix: String,

    /// Gzip payloads at or above `compression_threshold` bytes.
    pub enable_compression: bool,

    /// Serialized size (bytes) from which payloads are compressed.
    pub compression_threshold: usize,

    /// TTL used when a write does not specify one.
    pub default_ttl_secs: u64,

    /// Connection establishment timeout in milliseconds.
    pub connection_timeout_ms: u64,

    /// Consecutive errors before the client stops calling the backend.
    pub guard_threshold: u32,

    /// How long the client short-circuits once the guard opens.
    pub guard_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: 6379,
            password: None,
            db: 0,
            key_prefix: "compliance:".to_string(),
            enable_compression: true,
            compression_threshold: 1024,
            default_ttl_secs: 3600,
            connection_timeout_ms: 5000,
            guard_threshold: 5,
            guard_timeout_secs: 30,
        }
    }
}

impl RedisConfig {
    /// Returns true if a real Redis endpoint is configured.
    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.host.is_some()
    }

    /// Build the connection URL from the configured parts.
    pub fn connection_url(&self) -> Option<String> {
        if let Some(url) = &self.url {
            return Some(url.clone());
        }
        let host = self.host.as_ref()?;
        let mut parsed =
            url::Url::parse(&format!("redis://{}:{}/{}", host, self.port, self.db)).ok()?;
        if let Some(password) = &self.password {
            parsed.set_password(Some(password)).ok()?;
        }
        Some(parsed.to_string())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn guard_timeout(&self) -> Duration {
        Duration::from_secs(self.guard_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Deadline for one guarded invocation in milliseconds.
    pub timeout_ms: u64,

    /// Failure percentage (0-100) within the window that opens the circuit.
    pub error_threshold_percentage: u8,

    /// How long the circuit stays open before a trial call, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Length of the rolling statistics window in milliseconds.
    pub rolling_count_timeout_ms: u64,

    /// Number of buckets the window is split into.
    pub rolling_count_buckets: u32,

    /// Minimum calls in the window before the threshold is evaluated.
    pub volume_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            error_threshold_percentage: 50,
            reset_timeout_ms: 30_000,
            rolling_count_timeout_ms: 10_000,
            rolling_count_buckets: 10,
            volume_threshold: 0,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_count_timeout_ms)
    }
}

/// Partial breaker settings for a single integration.
///
/// Unset fields inherit from the layer-wide `circuit_breaker` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerOverrides {
    pub error_threshold_percentage: Option<u8>,
    pub reset_timeout_ms: Option<u64>,
    pub rolling_count_timeout_ms: Option<u64>,
    pub rolling_count_buckets: Option<u32>,
    pub volume_threshold: Option<u32>,
}

impl BreakerOverrides {
    /// Merge onto `base`; the integration timeout always wins.
    pub fn apply(&self, base: &CircuitBreakerConfig, timeout_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            timeout_ms,
            error_threshold_percentage: self
                .error_threshold_percentage
                .unwrap_or(base.error_threshold_percentage),
            reset_timeout_ms: self.reset_timeout_ms.unwrap_or(base.reset_timeout_ms),
            rolling_count_timeout_ms: self
                .rolling_count_timeout_ms
                .unwrap_or(base.rolling_count_timeout_ms),
            rolling_count_buckets: self
                .rolling_count_buckets
                .unwrap_or(base.rolling_count_buckets),
            volume_threshold: self.volume_threshold.unwrap_or(base.volume_threshold),
        }
    }
}

/// Per-service integration configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IntegrationConfig {
    /// Service name, used in cache keys, logs and user-facing errors.
    pub name: String,

    /// Deadline covering the whole retry loop, in milliseconds.
    #[serde(default = "default_integration_timeout")]
    pub timeout_ms: u64,

    /// Maximum attempts per call.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds.
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Lifetime of cached results in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Serve identical calls from the cache.
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,

    /// Optional breaker overrides for this service.
    #[serde(default)]
    pub circuit_breaker: BreakerOverrides,
}

fn default_integration_timeout() -> u64 {
    10_000
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1_000
}

fn default_max_retry_delay() -> u64 {
    60_000
}

fn default_cache_ttl() -> u64 {
    86_400
}

fn default_cache_enabled() -> bool {
    true
}

impl IntegrationConfig {
    /// Create a config with default call settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout_ms: default_integration_timeout(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            cache_ttl_secs: default_cache_ttl(),
            cache_enabled: default_cache_enabled(),
            circuit_breaker: BreakerOverrides::default(),
        }
    }

    /// The regulatory and geodata services the platform talks to.
    pub fn agency_defaults() -> Vec<Self> {
        let slow = |name: &str| {
            let mut config = Self::new(name);
            config.timeout_ms = 15_000;
            config.retry_delay_ms = 2_000;
            config
        };
        let usgs = slow("USGS");
        let copernicus = slow("Copernicus");
        vec![
            Self::new("ANM"),
            Self::new("CPRM"),
            Self::new("IBAMA"),
            Self::new("ANP"),
            usgs,
            copernicus,
        ]
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LayerConfig::default();
        assert_eq!(config.redis.compression_threshold, 1024);
        assert_eq!(config.redis.guard_threshold, 5);
        assert_eq!(config.circuit_breaker.error_threshold_percentage, 50);
        assert_eq!(config.integrations.len(), 6);

        let anm = &config.integrations[0];
        assert_eq!(anm.name, "ANM");
        assert_eq!(anm.retries, 3);
        assert_eq!(anm.cache_ttl(), Duration::from_secs(86_400));

        let usgs = config.integrations.iter().find(|i| i.name == "USGS").unwrap();
        assert_eq!(usgs.timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_connection_url() {
        let mut redis = RedisConfig::default();
        assert!(!redis.is_configured());
        assert!(redis.connection_url().is_none());

        redis.host = Some("cache.internal".into());
        redis.password = Some("s3cret".into());
        redis.db = 2;
        assert_eq!(
            redis.connection_url().as_deref(),
            Some("redis://:s3cret@cache.internal:6379/2")
        );

        redis.url = Some("redis://other:6380/0".into());
        assert_eq!(redis.connection_url().as_deref(), Some("redis://other:6380/0"));
    }

    #[test]
    fn test_connection_url_encodes_password() {
        let redis = RedisConfig {
            host: Some("cache.internal".into()),
            password: Some("p@ss/w:rd#1".into()),
            ..RedisConfig::default()
        };
        let raw = redis.connection_url().unwrap();
        assert_eq!(raw, "redis://:p%40ss%2Fw%3Ard%231@cache.internal:6379/0");

        let parsed = url::Url::parse(&raw).unwrap();
        assert_eq!(parsed.host_str(), Some("cache.internal"));
        assert_eq!(parsed.port(), Some(6379));
        assert_eq!(parsed.path(), "/0");
        assert_eq!(parsed.password(), Some("p%40ss%2Fw%3Ard%231"));

        let info = redis::IntoConnectionInfo::into_connection_info(raw.as_str()).unwrap();
        assert_eq!(info.redis.password.as_deref(), Some("p@ss/w:rd#1"));
    }

    #[test]
    fn test_breaker_overrides() {
        let base = CircuitBreakerConfig::default();
        let overrides = BreakerOverrides {
            reset_timeout_ms: Some(5_000),
            ..Default::default()
        };
        let merged = overrides.apply(&base, 15_000);
        assert_eq!(merged.timeout_ms, 15_000);
        assert_eq!(merged.reset_timeout_ms, 5_000);
        assert_eq!(merged.rolling_count_buckets, base.rolling_count_buckets);
    }
}
