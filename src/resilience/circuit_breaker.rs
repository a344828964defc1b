//! Circuit breaker for external dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through racing the timeout
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: testing if the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: error percentage >= threshold within the rolling window
//! Open → Half-Open: after reset timeout (checked lazily on the next call)
//! Half-Open → Closed: trial call succeeds (window reset)
//! Half-Open → Open: trial call fails or times out (timer restarted)
//! ```
//!
//! # Design Decisions
//! - Per-integration circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single trial in Half-Open (prevents hammering a recovering dependency)
//! - State lives behind one std mutex; it is never held across an await
//! - A trial permit released by a dropped future frees the Half-Open slot

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::events::{BreakerEvent, BreakerEventKind, EventPublisher};
use super::rolling::{Outcome, RollingWindow, WindowTotals};
use super::timeouts::with_deadline;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a guarded call did not produce a value.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Circuit is open; the function was not invoked.
    #[error("Circuit breaker is open for {name}")]
    Open { name: String },

    #[error("{name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Operation failed: {0}")]
    Failed(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Point-in-time view of a breaker, served by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub window: WindowTotals,
    pub error_percentage: f64,
    pub fires: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub rejects: u64,
    pub mean_latency_ms: f64,
}

#[derive(Debug, Default)]
struct Lifetime {
    fires: u64,
    successes: u64,
    failures: u64,
    timeouts: u64,
    rejects: u64,
    latency_total: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    window: RollingWindow,
    lifetime: Lifetime,
}

pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    events: EventPublisher,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Admission ticket for one call. Dropping an unsettled trial permit frees
/// the Half-Open slot without changing state.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            let mut inner = self.breaker.lock();
            inner.trial_in_flight = false;
            tracing::debug!(component = %self.breaker.name, "Half-open trial abandoned");
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        tracing::info!(
            component = %name,
            timeout_ms = config.timeout_ms,
            error_threshold_percentage = config.error_threshold_percentage,
            reset_timeout_ms = config.reset_timeout_ms,
            "Circuit breaker initialized"
        );

        let window = RollingWindow::new(config.rolling_window(), config.rolling_count_buckets);
        Self {
            events: EventPublisher::new(Arc::clone(&name)),
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
                trial_in_flight: false,
                window,
                lifetime: Lifetime::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, applying any due Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Execute `operation` under breaker protection and the configured timeout.
    ///
    /// Exactly one outcome is recorded per call regardless of what
    /// `operation` does internally.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(mut permit) = self.acquire() else {
            return Err(BreakerError::Open {
                name: self.name.to_string(),
            });
        };
        let start = Instant::now();
        let timeout = self.config.timeout();

        let result = with_deadline(timeout, operation()).await;
        let elapsed = start.elapsed();
        permit.settled = true;

        match result {
            Ok(Ok(value)) => {
                self.on_success(permit.trial, elapsed);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure(permit.trial, Outcome::Failure, elapsed);
                Err(BreakerError::Failed(e))
            }
            Err(_) => {
                tracing::warn!(
                    component = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Circuit breaker call timed out"
                );
                self.events.publish(BreakerEventKind::Timeout { after: timeout });
                self.on_failure(permit.trial, Outcome::Timeout, elapsed);
                Err(BreakerError::Timeout {
                    name: self.name.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Bind a function to this breaker.
    pub fn wrap<F>(self: Arc<Self>, func: F) -> Guarded<F> {
        Guarded {
            breaker: self,
            func,
        }
    }

    /// Force the circuit open (e.g. during a known outage).
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.trial_in_flight = false;
        self.transition_to_open(&mut inner);
    }

    /// Force the circuit closed and forget the window.
    pub fn force_closed(&self) {
        let mut inner = self.lock();
        inner.trial_in_flight = false;
        self.transition_to_closed(&mut inner);
    }

    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        let window = inner.window.totals();
        let lifetime = &inner.lifetime;
        let executed = lifetime.successes + lifetime.failures + lifetime.timeouts;
        let mean_latency_ms = if executed == 0 {
            0.0
        } else {
            lifetime.latency_total.as_secs_f64() * 1000.0 / executed as f64
        };

        BreakerStats {
            name: self.name.to_string(),
            state: inner.state,
            error_percentage: window.error_percentage(),
            window,
            fires: lifetime.fires,
            successes: lifetime.successes,
            failures: lifetime.failures,
            timeouts: lifetime.timeouts,
            rejects: lifetime.rejects,
            mean_latency_ms,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    /// Admit a call or record a rejection.
    fn acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.lifetime.fires += 1;

        let state = inner.state;
        let trial = match state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                inner.window.record(Outcome::Reject);
                inner.lifetime.rejects += 1;
                drop(inner);

                tracing::warn!(component = %self.name, "Circuit breaker rejected call");
                metrics::record_breaker_rejection(&self.name);
                self.events.publish(BreakerEventKind::Reject);
                return None;
            }
        };

        Some(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool, elapsed: Duration) {
        let mut inner = self.lock();
        inner.window.record(Outcome::Success);
        inner.lifetime.successes += 1;
        inner.lifetime.latency_total += elapsed;

        if trial {
            inner.trial_in_flight = false;
            if inner.state == CircuitState::HalfOpen {
                self.transition_to_closed(&mut inner);
            }
        }
    }

    fn on_failure(&self, trial: bool, outcome: Outcome, elapsed: Duration) {
        let mut inner = self.lock();
        inner.window.record(outcome);
        inner.lifetime.latency_total += elapsed;
        match outcome {
            Outcome::Timeout => inner.lifetime.timeouts += 1,
            _ => inner.lifetime.failures += 1,
        }

        if trial {
            inner.trial_in_flight = false;
            if inner.state == CircuitState::HalfOpen {
                self.transition_to_open(&mut inner);
            }
            return;
        }

        if inner.state == CircuitState::Closed {
            let totals = inner.window.totals();
            let volume_reached = totals.executed() >= u64::from(self.config.volume_threshold);
            let threshold = f64::from(self.config.error_threshold_percentage);
            if volume_reached && totals.error_percentage() >= threshold {
                tracing::debug!(
                    component = %self.name,
                    error_percentage = totals.error_percentage(),
                    executed = totals.executed(),
                    "Error threshold reached"
                );
                self.transition_to_open(&mut inner);
            }
        }
    }

    /// Apply the time-driven Open → Half-Open transition.
    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let due = inner
            .opened_at
            .map(|at| at.elapsed() >= self.config.reset_timeout())
            .unwrap_or(true);
        if due {
            self.transition_to_half_open(inner);
        }
    }

    fn transition_to_open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        tracing::warn!(
            component = %self.name,
            reset_timeout_ms = self.config.reset_timeout_ms,
            "Circuit breaker opened"
        );
        metrics::record_breaker_transition(&self.name, CircuitState::Open.as_str());
        self.events.publish(BreakerEventKind::Open);
    }

    fn transition_to_half_open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::HalfOpen;
        inner.trial_in_flight = false;
        tracing::info!(component = %self.name, "Circuit breaker half-open, allowing trial call");
        metrics::record_breaker_transition(&self.name, CircuitState::HalfOpen.as_str());
        self.events.publish(BreakerEventKind::HalfOpen);
    }

    fn transition_to_closed(&self, inner: &mut BreakerInner) {
        let was = inner.state;
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.window.reset();
        if was != CircuitState::Closed {
            tracing::info!(component = %self.name, "Circuit breaker closed");
            metrics::record_breaker_transition(&self.name, CircuitState::Closed.as_str());
            self.events.publish(BreakerEventKind::Close);
        }
    }
}

/// A function bound to a breaker: `wrap(fn) -> guarded fn`.
pub struct Guarded<F> {
    breaker: Arc<CircuitBreaker>,
    func: F,
}

impl<F> Guarded<F> {
    /// Invoke the bound function through the breaker.
    pub async fn fire<A, T, E, Fut>(&self, args: A) -> Result<T, BreakerError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker.call(|| (self.func)(args)).await
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}
