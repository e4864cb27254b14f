//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mesh_lb_selections_total` (counter): selections by service, method
//! - `mesh_lb_no_candidates_total` (counter): selections with no viable backend
//! - `mesh_circuit_breaker_transitions_total` (counter): by breaker, target state
//! - `mesh_circuit_breaker_open` (gauge): 1=open, 0=closed/half-open
//! - `mesh_instance_health` (gauge): 1=healthy, 0=otherwise
//! - `mesh_probes_total` (counter): probe outcomes by probe type, status
//! - `mesh_probe_cycle_seconds` (gauge): duration of the last probe cycle
//! - `mesh_routing_routes` / `mesh_routing_clusters` (gauges): published table size
//! - `mesh_routing_refresh_failures_total` (counter)
//!
//! # Design Decisions
//! - Facade macros are no-ops until a recorder is installed (tests run without one)
//! - Prometheus exporter serves its own HTTP listener

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::registry::HealthStatus;
use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_selection(service: &str, method: &str) {
    counter!(
        "mesh_lb_selections_total",
        "service" => service.to_string(),
        "method" => method.to_string()
    )
    .increment(1);
}

pub fn record_no_candidates(service: &str) {
    counter!("mesh_lb_no_candidates_total", "service" => service.to_string()).increment(1);
}

pub fn record_breaker_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "mesh_circuit_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    let open = if to == CircuitState::Open { 1.0 } else { 0.0 };
    gauge!("mesh_circuit_breaker_open", "breaker" => breaker.to_string()).set(open);
}

pub fn record_instance_health(service: &str, instance: &str, status: HealthStatus, probe_type: &str) {
    let healthy = if status == HealthStatus::Healthy { 1.0 } else { 0.0 };
    gauge!(
        "mesh_instance_health",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(healthy);
    counter!(
        "mesh_probes_total",
        "probe_type" => probe_type.to_string(),
        "status" => status.as_str()
    )
    .increment(1);
}

pub fn record_probe_cycle(duration: Duration) {
    gauge!("mesh_probe_cycle_seconds").set(duration.as_secs_f64());
}

pub fn record_routing_table(routes: usize, clusters: usize) {
    gauge!("mesh_routing_routes").set(routes as f64);
    gauge!("mesh_routing_clusters").set(clusters as f64);
}

pub fn record_routing_failure() {
    counter!("mesh_routing_refresh_failures_total").increment(1);
}
