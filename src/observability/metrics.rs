//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define agent metrics (events, driver calls, cache size)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `dhcp_agent_events_total` (counter): lifecycle events by resource, operation
//! - `dhcp_agent_driver_calls_total` (counter): driver actions by action, outcome
//! - `dhcp_agent_cached_networks` / `_subnets` / `_ports` (gauge): cache size
//!
//! # Design Decisions
//! - Recording is unconditional and cheap; only the exporter is gated by
//!   config, so code paths never branch on metrics being enabled

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::agent::cache::CacheSummary;
use crate::driver::DriverAction;

/// Start the Prometheus scrape endpoint. Must run inside a tokio runtime.
pub fn init_metrics(address: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()?;
    tracing::info!(address = %address, "Metrics endpoint listening");
    Ok(())
}

/// Count one lifecycle event, e.g. (`network`, `delete`).
pub fn record_event(resource: &'static str, operation: &'static str) {
    counter!(
        "dhcp_agent_events_total",
        "resource" => resource,
        "operation" => operation,
    )
    .increment(1);
}

/// Count one driver invocation and its outcome.
pub fn record_driver_call(action: DriverAction, success: bool) {
    counter!(
        "dhcp_agent_driver_calls_total",
        "action" => action.to_string(),
        "outcome" => if success { "ok" } else { "error" },
    )
    .increment(1);
}

/// Publish the cache size after a reconciliation pass.
pub fn record_cache_summary(summary: CacheSummary) {
    gauge!("dhcp_agent_cached_networks").set(summary.networks as f64);
    gauge!("dhcp_agent_cached_subnets").set(summary.subnets as f64);
    gauge!("dhcp_agent_cached_ports").set(summary.ports as f64);
}
