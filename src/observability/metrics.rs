//! Metrics collection and exposition.
//!
//! # Metrics
//! - `balancer_active_connections` (gauge): connections currently relayed
//! - `balancer_backend_served_total` (counter): dispatches per backend
//! - `balancer_backend_failures_total` (counter): dial/relay failures per backend
//! - `balancer_backend_health` (gauge): 1=healthy, 0=unhealthy
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed with [`init_metrics`].

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

pub const ACTIVE_CONNECTIONS: &str = "balancer_active_connections";
pub const BACKEND_SERVED: &str = "balancer_backend_served_total";
pub const BACKEND_FAILURES: &str = "balancer_backend_failures_total";
pub const BACKEND_HEALTH: &str = "balancer_backend_health";

/// Install the Prometheus recorder and its HTTP scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_gauge!(ACTIVE_CONNECTIONS, "Number of active relayed connections");
            describe_counter!(BACKEND_SERVED, "Connections dispatched per backend");
            describe_counter!(BACKEND_FAILURES, "Dial and relay failures per backend");
            describe_gauge!(BACKEND_HEALTH, "Backend health (1=healthy, 0=unhealthy)");
            tracing::info!(address = %addr, "Prometheus metrics available at /metrics");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
        }
    }
}

pub fn set_active_connections(count: usize) {
    gauge!(ACTIVE_CONNECTIONS).set(count as f64);
}

pub fn record_backend_served(backend: &str) {
    counter!(BACKEND_SERVED, "backend" => backend.to_string()).increment(1);
}

pub fn record_backend_failure(backend: &str) {
    counter!(BACKEND_FAILURES, "backend" => backend.to_string()).increment(1);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!(BACKEND_HEALTH, "backend" => backend.to_string()).set(if healthy { 1.0 } else { 0.0 });
}
