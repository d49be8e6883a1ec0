//! Metrics collection and exposition.
//!
//! # Metrics
//! - `envelope_breaker_transitions_total` (counter): transitions by breaker, from, to
//! - `envelope_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `envelope_breaker_rejections_total` (counter): fast-fails by breaker, reason
//! - `envelope_breaker_calls_total` (counter): admitted calls by breaker, outcome
//! - `envelope_retry_attempts_total` (counter): backoff sleeps by retry policy
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in via `init_metrics`

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    metrics::counter!(
        "envelope_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_state(breaker, to);
}

pub fn record_state(breaker: &str, state: CircuitState) {
    metrics::gauge!("envelope_breaker_state", "breaker" => breaker.to_string())
        .set(state.gauge_value());
}

pub fn record_rejection(breaker: &str, reason: &'static str) {
    metrics::counter!(
        "envelope_breaker_rejections_total",
        "breaker" => breaker.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_call(breaker: &str, outcome: &'static str) {
    metrics::counter!(
        "envelope_breaker_calls_total",
        "breaker" => breaker.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_retry_attempt(policy: &str) {
    metrics::counter!("envelope_retry_attempts_total", "policy" => policy.to_string()).increment(1);
}
