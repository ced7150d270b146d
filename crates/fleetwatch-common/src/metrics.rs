//! Prometheus metrics registration, adapted from the teacher's
//! health/severity aggregation helpers to this domain's counters and
//! gauges. Recording call sites live in the crates that own the
//! events (buffer/detector, correlator, webhook); this module only
//! owns the recorder setup and the metric name constants so every
//! crate emits under the same names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{Error, Result};

pub const ANOMALIES_TOTAL: &str = "fleetwatch_anomalies_total";
pub const ANOMALIES_RESOLVED_TOTAL: &str = "fleetwatch_anomalies_resolved_total";
pub const CORRELATED_GROUPS_TOTAL: &str = "fleetwatch_correlated_groups_total";
pub const WEBHOOK_DELIVERIES_TOTAL: &str = "fleetwatch_webhook_deliveries_total";
pub const WEBHOOK_DELIVERIES_DEAD_LETTERED: &str = "fleetwatch_webhook_deliveries_dead_lettered_total";
pub const WEBHOOK_DELIVERY_DURATION_MS: &str = "fleetwatch_webhook_delivery_duration_ms";
pub const POLL_CYCLES_TOTAL: &str = "fleetwatch_poll_cycles_total";
pub const POLL_CYCLES_SKIPPED_TOTAL: &str = "fleetwatch_poll_cycles_skipped_total";
pub const ACTIVE_CONNECTIONS: &str = "fleetwatch_active_connections";
pub const THRESHOLD_GATE_ACTIVE: &str = "fleetwatch_threshold_gate_active";

/// Install the global Prometheus recorder and register metric
/// descriptions, mirroring `mcp-gateway`'s `/metrics` text-exposition
/// setup. Returns a handle the HTTP surface renders on `GET /metrics`.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .map_err(|e| Error::Internal(format!("failed to install metrics recorder: {e}")))?;

    metrics::describe_counter!(ANOMALIES_TOTAL, "Total anomaly events detected, by connection and metric");
    metrics::describe_counter!(ANOMALIES_RESOLVED_TOTAL, "Total anomaly events resolved");
    metrics::describe_counter!(CORRELATED_GROUPS_TOTAL, "Total correlated anomaly groups formed");
    metrics::describe_counter!(WEBHOOK_DELIVERIES_TOTAL, "Total webhook delivery attempts, by outcome");
    metrics::describe_counter!(WEBHOOK_DELIVERIES_DEAD_LETTERED, "Total webhook deliveries moved to the dead-letter queue");
    metrics::describe_histogram!(WEBHOOK_DELIVERY_DURATION_MS, "Webhook delivery attempt duration in milliseconds");
    metrics::describe_counter!(POLL_CYCLES_TOTAL, "Total supervisor poll cycles executed");
    metrics::describe_counter!(POLL_CYCLES_SKIPPED_TOTAL, "Total supervisor poll cycles skipped due to overrun");
    metrics::describe_gauge!(ACTIVE_CONNECTIONS, "Number of connections currently registered");
    metrics::describe_gauge!(THRESHOLD_GATE_ACTIVE, "Number of currently-active threshold gates");

    Ok(handle)
}
