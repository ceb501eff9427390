//! Metrics collection and exposition.
//!
//! # Metrics
//! - `aggregator_connect_attempts_total` (counter): attempts by prefix, outcome
//! - `aggregator_connected_downstreams` (gauge): connections in the active topology
//! - `aggregator_reloads_total` (counter): reloads by outcome

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connect_attempt(prefix: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        "aggregator_connect_attempts_total",
        "prefix" => prefix.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn set_connected_downstreams(count: usize) {
    metrics::gauge!("aggregator_connected_downstreams").set(count as f64);
}

pub fn record_reload(outcome: &'static str) {
    metrics::counter!("aggregator_reloads_total", "outcome" => outcome).increment(1);
}
