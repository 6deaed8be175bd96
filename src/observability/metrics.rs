//! Metrics collection and exposition.
//!
//! # Metrics
//! - `router_decisions_total` (counter): routing decisions by strategy and reason
//! - `router_fallback_steps_total` (counter): failover steps by stage and outcome
//! - `router_dispatch_duration_seconds` (histogram): dispatch latency by role and outcome
//! - `router_node_status` (gauge): 0=healthy, 1=degraded, 2=unhealthy, 3=draining
//! - `router_active_connections` (gauge): in-flight queries per node
//! - `router_probes_total` (counter): health probes by node and result

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::registry::NodeStatus;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics endpoint started");
    Ok(())
}

pub fn record_decision(strategy: &str, reason: &'static str) {
    metrics::counter!(
        "router_decisions_total",
        "strategy" => strategy.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_fallback_step(stage: &'static str, outcome: &'static str) {
    metrics::counter!(
        "router_fallback_steps_total",
        "stage" => stage,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_dispatch(role: &'static str, outcome: &'static str, elapsed: Duration) {
    metrics::histogram!(
        "router_dispatch_duration_seconds",
        "role" => role,
        "outcome" => outcome
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_node_status(node: &str, status: NodeStatus) {
    metrics::gauge!("router_node_status", "node" => node.to_string()).set(status as u8 as f64);
}

pub fn record_active_connections(node: &str, active: usize) {
    metrics::gauge!("router_active_connections", "node" => node.to_string()).set(active as f64);
}

pub fn record_probe(node: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!(
        "router_probes_total",
        "node" => node.to_string(),
        "result" => result
    )
    .increment(1);
}
