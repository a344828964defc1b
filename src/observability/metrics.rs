//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define integration-layer metrics (cache lookups, breaker transitions, calls)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-integration and per-tier metrics
//!
//! # Metrics
//! - `cache_lookups_total` (counter): lookups by layer (l1, l2, miss)
//! - `cache_l2_operations_total` (counter): L2 operations by op, result
//! - `cache_l2_duration_seconds` (histogram): L2 round-trip latency
//! - `cache_l1_entries` (gauge): in-process entry count
//! - `circuit_breaker_transitions_total` (counter): transitions by name, state
//! - `circuit_breaker_rejections_total` (counter): fail-fast rejections by name
//! - `integration_calls_total` (counter): calls by name, outcome
//! - `integration_call_duration_seconds` (histogram): end-to-end call latency
//! - `component_health` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op (tests, embedded use)
//! - Labels stay low-cardinality: never keys, only names and outcomes

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a two-tier cache lookup and the layer that answered it.
pub fn record_cache_lookup(layer: &'static str) {
    counter!("cache_lookups_total", "layer" => layer).increment(1);
}

/// Record one L2 round trip.
pub fn record_l2_operation(op: &'static str, ok: bool, latency: Duration) {
    let result = if ok { "ok" } else { "error" };
    counter!("cache_l2_operations_total", "op" => op, "result" => result).increment(1);
    histogram!("cache_l2_duration_seconds", "op" => op).record(latency.as_secs_f64());
}

/// Record the current L1 entry count.
pub fn record_l1_size(size: usize) {
    gauge!("cache_l1_entries").set(size as f64);
}

/// Record a circuit breaker state transition.
pub fn record_breaker_transition(name: &str, state: &'static str) {
    counter!(
        "circuit_breaker_transitions_total",
        "name" => name.to_string(),
        "state" => state
    )
    .increment(1);
}

/// Record a call rejected by an open circuit.
pub fn record_breaker_rejection(name: &str) {
    counter!("circuit_breaker_rejections_total", "name" => name.to_string()).increment(1);
}

/// Record the outcome of one wrapped integration call.
pub fn record_integration_call(name: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        "integration_calls_total",
        "name" => name.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("integration_call_duration_seconds", "name" => name.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record component health as a gauge.
pub fn record_backend_health(component: &str, healthy: bool) {
    gauge!("component_health", "component" => component.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
