//! Resilient call contract for one external service.
//!
//! # Data Flow
//! ```text
//! call(args)
//!     → key.rs (integration:<name>:<args>)
//!     → CacheManager::get          hit → return, nothing else runs
//!     → CircuitBreaker::call       open → Unavailable
//!         → retry_with_backoff     attempts 1..=retries, delay·2^(i-1)
//!             → the wrapped function
//!     → CacheManager::set          non-null results only
//! ```
//!
//! # Design Decisions
//! - Retries run inside the breaker: one outcome per outer call and one
//!   deadline for the whole retry loop
//! - Cache faults never fail a call
//! - User-facing errors name the service but carry no breaker internals

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::key::cache_key;
use crate::cache::CacheManager;
use crate::config::{CircuitBreakerConfig, IntegrationConfig};
use crate::observability::metrics;
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::{
    retry_with_backoff, BreakerError, CircuitBreaker, CircuitState, RetriesExhausted, RetryPolicy,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Circuit open; the service was not called.
    #[error("{service} service is temporarily unavailable. Please try again later.")]
    Unavailable { service: String },

    #[error("{service} did not respond within {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    /// Last error after every attempt failed.
    #[error("{service} request failed: {source}")]
    Failed { service: String, source: BoxError },
}

impl IntegrationError {
    pub fn service(&self) -> &str {
        match self {
            Self::Unavailable { service }
            | Self::Timeout { service, .. }
            | Self::Failed { service, .. } => service,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Failed { .. } => "failure",
        }
    }
}

/// One external service: its breaker, retry policy and cache settings.
#[derive(Debug)]
pub struct Integration {
    config: IntegrationConfig,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    cache: Option<CacheManager>,
}

impl Integration {
    pub fn new(
        config: IntegrationConfig,
        breaker_defaults: &CircuitBreakerConfig,
        cache: Option<CacheManager>,
    ) -> Self {
        let breaker_config = config.circuit_breaker.apply(breaker_defaults, config.timeout_ms);
        let breaker = Arc::new(CircuitBreaker::new(config.name.clone(), breaker_config));
        let retry = RetryPolicy::new(
            config.retries,
            BackoffPolicy::new(config.retry_delay(), Duration::from_millis(config.max_retry_delay_ms)),
        );

        Self {
            config,
            breaker,
            retry,
            cache,
        }
    }

    /// Replace the backoff schedule (tests use an exact one).
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.retry = RetryPolicy::new(self.config.retries, backoff);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &IntegrationConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn cache_for<A: Serialize + ?Sized>(&self, args: &A) -> Option<(&CacheManager, String)> {
        if !self.config.cache_enabled {
            return None;
        }
        let cache = self.cache.as_ref()?;
        match cache_key(&self.config.name, args) {
            Ok(key) => Some((cache, key)),
            Err(e) => {
                tracing::warn!(integration = %self.config.name, error = %e, "Arguments not cacheable");
                None
            }
        }
    }

    /// Run `op` for `args` through cache, breaker and retries.
    ///
    /// `op` is re-invoked for each attempt.
    pub async fn call<A, T, E, F, Fut>(&self, args: &A, op: F) -> Result<T, IntegrationError>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        E: Into<BoxError> + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let cached = self.cache_for(args);

        if let Some((cache, key)) = &cached {
            if let Some(value) = cache.get::<T>(key).await.value {
                tracing::debug!(integration = %self.name(), key = %key, "Serving cached result");
                metrics::record_integration_call(self.name(), "cache_hit", start.elapsed());
                return Ok(value);
            }
        }

        let policy = self.retry;
        let name = self.config.name.as_str();
        let result = self
            .breaker
            .call(|| retry_with_backoff(&policy, name, op))
            .await;

        match result {
            Ok(value) => {
                if let Some((cache, key)) = &cached {
                    self.store(cache, key, &value).await;
                }
                metrics::record_integration_call(name, "success", start.elapsed());
                Ok(value)
            }
            Err(e) => {
                let error = self.map_error(e);
                tracing::warn!(
                    integration = %name,
                    error = %error,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Integration call failed"
                );
                metrics::record_integration_call(name, error.outcome(), start.elapsed());
                Err(error)
            }
        }
    }

    async fn store<T: Serialize>(&self, cache: &CacheManager, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(serde_json::Value::Null) => {
                tracing::debug!(integration = %self.name(), "Null result not cached");
            }
            Ok(json) => cache.set(key, &json, Some(self.config.cache_ttl())).await,
            Err(e) => tracing::warn!(integration = %self.name(), error = %e, "Result not cacheable"),
        }
    }

    fn map_error<E: Into<BoxError>>(&self, error: BreakerError<RetriesExhausted<E>>) -> IntegrationError {
        let service = self.config.name.clone();
        if error.is_open() || self.breaker.state() == CircuitState::Open {
            return IntegrationError::Unavailable { service };
        }
        match error {
            BreakerError::Timeout { timeout, .. } => IntegrationError::Timeout { service, timeout },
            BreakerError::Failed(exhausted) => IntegrationError::Failed {
                service,
                source: exhausted.into_inner().into(),
            },
            BreakerError::Open { .. } => IntegrationError::Unavailable { service },
        }
    }

    /// Bind a function to this integration: `wrap(fn) -> wrapped fn`.
    pub fn wrap<F>(self: &Arc<Self>, func: F) -> WrappedIntegration<F> {
        WrappedIntegration {
            integration: Arc::clone(self),
            func,
        }
    }
}

/// A function bound to an [`Integration`].
pub struct WrappedIntegration<F> {
    integration: Arc<Integration>,
    func: F,
}

impl<F> WrappedIntegration<F> {
    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, IntegrationError>
    where
        F: Fn(A) -> Fut,
        A: Serialize + Clone,
        T: Serialize + DeserializeOwned,
        E: Into<BoxError> + fmt::Display,
        Fut: Future<Output = Result<T, E>>,
    {
        self.integration
            .call(&args, || (self.func)(args.clone()))
            .await
    }

    pub fn integration(&self) -> &Arc<Integration> {
        &self.integration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryCacheConfig;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn integration(name: &str, retries: u32, cache: Option<CacheManager>) -> Arc<Integration> {
        let mut config = IntegrationConfig::new(name);
        config.retries = retries;
        config.retry_delay_ms = 100;
        Arc::new(Integration::new(config, &CircuitBreakerConfig::default(), cache))
    }

    fn l1_cache() -> CacheManager {
        let config = MemoryCacheConfig {
            enable_l2: false,
            ..MemoryCacheConfig::default()
        };
        CacheManager::new(config, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_records_one_outcome_per_call() {
        let anm = integration("ANM", 3, None);
        let attempts = AtomicU32::new(0);

        let result: Result<Value, _> = anm
            .call(&json!({"id": "1"}), || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("flaky")
                    } else {
                        Ok(json!({"status": "ok"}))
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), json!({"status": "ok"}));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let stats = anm.breaker().stats();
        assert_eq!((stats.window.successes, stats.window.failures), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_propagate_last_error() {
        let cprm = integration("CPRM", 2, None);
        let result: Result<Value, _> = cprm
            .call(&1, || async { Err::<Value, _>("upstream 503") })
            .await;

        // A single failure trips the 50% threshold, so callers see Unavailable.
        assert!(result.unwrap_err().is_unavailable());

        let ibama = integration("IBAMA", 2, None);
        for _ in 0..3 {
            let _: Result<Value, _> = ibama.call(&0, || async { Ok::<_, &str>(json!(0)) }).await;
        }
        let err = ibama
            .call(&2, || async { Err::<Value, _>("upstream 503") })
            .await
            .unwrap_err();
        match err {
            IntegrationError::Failed { service, source } => {
                assert_eq!(service, "IBAMA");
                assert_eq!(source.to_string(), "upstream 503");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_message() {
        let anp = integration("ANP", 1, None);
        anp.breaker().force_open();
        let calls = AtomicU32::new(0);

        let err = anp
            .call(&"q", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, &str>(json!(1)) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            err.to_string(),
            "ANP service is temporarily unavailable. Please try again later."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_call_skips_breaker() {
        let usgs = integration("USGS", 1, Some(l1_cache()));
        let wrapped = usgs.wrap(|(lat, lon): (i32, i32)| async move {
            Ok::<_, &str>(json!({"sum": lat + lon}))
        });

        assert_eq!(wrapped.call((1, 2)).await.unwrap(), json!({"sum": 3}));
        assert_eq!(wrapped.call((1, 2)).await.unwrap(), json!({"sum": 3}));
        assert_eq!(usgs.breaker().stats().fires, 1);

        wrapped.call((2, 2)).await.unwrap();
        assert_eq!(usgs.breaker().stats().fires, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_results_are_not_cached() {
        let cache = l1_cache();
        let copernicus = integration("Copernicus", 1, Some(cache.clone()));

        let _: Option<u32> = copernicus.call(&"tile", || async { Ok::<_, &str>(None) }).await.unwrap();
        let _: Option<u32> = copernicus.call(&"tile", || async { Ok::<_, &str>(None) }).await.unwrap();

        assert_eq!(copernicus.breaker().stats().fires, 2);
        assert!(!cache.has(&cache_key("Copernicus", &"tile").unwrap()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_covers_retry_loop() {
        let mut config = IntegrationConfig::new("slow");
        config.timeout_ms = 1500;
        config.retries = 3;
        config.retry_delay_ms = 1000;
        let slow = Integration::new(config, &CircuitBreakerConfig::default(), None)
            .with_backoff(BackoffPolicy::exact(Duration::from_millis(1000), Duration::from_secs(60)));
        let attempts = AtomicU32::new(0);

        let start = Instant::now();
        let err = slow
            .call(&(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<Value, _>("down") }
            })
            .await
            .unwrap_err();

        // Attempt 3 would start at 3000ms; the 1500ms deadline cancels the loop.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
        assert!(err.is_unavailable() || matches!(err, IntegrationError::Timeout { .. }));
    }
}
