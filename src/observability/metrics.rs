//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, service
//! - `gateway_request_duration_seconds` (histogram): latency by method, service
//! - `gateway_rate_limited_total` (counter): rejections by key kind (user / ip)
//! - `gateway_circuit_rejections_total` (counter): fast-fails by service, state
//! - `gateway_circuit_state` (gauge): 0 closed, 1 half-open, 2 open
//! - `gateway_upstream_failures_total` (counter): failures by service, kind
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;
use crate::upstream::FailureKind;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);

    match builder.install() {
        Ok(_) => tracing::info!(address = %addr, "Prometheus metrics exporter started"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus recorder"),
    }
}

pub fn record_request(method: &str, status: u16, service: &str, start: Instant) {
    let duration = start.elapsed().as_secs_f64();

    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "service" => service.to_string()
    )
    .increment(1);

    histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "service" => service.to_string()
    )
    .record(duration);
}

pub fn record_rate_limited(key_kind: &'static str) {
    counter!("gateway_rate_limited_total", "key_kind" => key_kind).increment(1);
}

pub fn record_circuit_rejection(service: &str, state: CircuitState) {
    counter!(
        "gateway_circuit_rejections_total",
        "service" => service.to_string(),
        "state" => state.as_str()
    )
    .increment(1);
}

pub fn set_circuit_state(service: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("gateway_circuit_state", "service" => service.to_string()).set(value);
}

pub fn record_upstream_failure(service: &str, kind: FailureKind) {
    counter!(
        "gateway_upstream_failures_total",
        "service" => service.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}
