//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_calls_total` (counter): relayed calls by service, grpc code
//! - `relay_call_duration_seconds` (histogram): call latency by service
//! - `relay_pick_failures_total` (counter): failed picks by policy
//! - `relay_resolver_updates_total` (counter): state pushes by service
//! - `relay_resolver_addresses` (gauge): addresses in the last push
//! - `relay_backend_healthy` (gauge): 1=healthy, 0=unhealthy

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_call(service: &str, code: &str, start: Instant) {
    counter!("relay_calls_total", "service" => service.to_string(), "code" => code.to_string())
        .increment(1);
    histogram!("relay_call_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_pick_failure(policy: &str) {
    counter!("relay_pick_failures_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_resolver_update(service: &str, addresses: usize) {
    counter!("relay_resolver_updates_total", "service" => service.to_string()).increment(1);
    gauge!("relay_resolver_addresses", "service" => service.to_string()).set(addresses as f64);
}

pub fn record_backend_health(addr: &str, healthy: bool) {
    gauge!("relay_backend_healthy", "addr" => addr.to_string()).set(if healthy { 1.0 } else { 0.0 });
}
