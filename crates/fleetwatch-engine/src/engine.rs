//! Anomaly engine: orchestrates the buffer and detector (crate
//! `fleetwatch-buffer`) across every monitored connection, persists
//! fired events, and forwards them to whatever implements
//! `EventDispatch` (the webhook dispatcher, in production).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use fleetwatch_buffer::{MetricBuffer, MetricSample};
use fleetwatch_buffer::{Detector, DetectorConfig, DetectorState};
use fleetwatch_common::types::{AnomalyEvent, AnomalyKind, ConnectionId, MetricKind};
use fleetwatch_common::{metrics as fw_metrics, Clock, EventDispatch, Ring};
use fleetwatch_dbclient::DatabaseClient;
use fleetwatch_storage::Storage;

use crate::extractors;

/// Per-(connection, metric) mutable state the engine owns across
/// ticks: the rolling buffer and the detector's streak/cooldown memory.
struct MetricState {
    buffer: MetricBuffer,
    detector_state: DetectorState,
}

/// Orchestrates component A (buffer) + B (detector) across the fleet,
/// i.e. component E from spec.md §2.
pub struct AnomalyEngine {
    buffer_capacity: usize,
    min_samples: usize,
    detectors: HashMap<MetricKind, Detector>,
    state: RwLock<HashMap<(ConnectionId, MetricKind), MetricState>>,
    events: Arc<Ring<AnomalyEvent>>,
    storage: Arc<dyn Storage>,
    dispatch: Arc<dyn EventDispatch>,
    clock: Arc<dyn Clock>,
}

impl AnomalyEngine {
    pub fn new(
        buffer_capacity: usize,
        min_samples: usize,
        detector_overrides: &HashMap<String, fleetwatch_common::config::DetectorOverride>,
        max_recent_events: usize,
        storage: Arc<dyn Storage>,
        dispatch: Arc<dyn EventDispatch>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let mut detectors = HashMap::new();
        for kind in MetricKind::ALL {
            let mut cfg = extractors::default_detector_config(kind);
            if let Some(over) = detector_overrides.get(kind.as_str()) {
                cfg = extractors::merge_override(cfg, over);
            }
            detectors.insert(kind, Detector::new(cfg));
        }

        Arc::new(Self {
            buffer_capacity,
            min_samples,
            detectors,
            state: RwLock::new(HashMap::new()),
            events: Arc::new(Ring::new(max_recent_events)),
            storage,
            dispatch,
            clock,
        })
    }

    pub fn events(&self) -> Arc<Ring<AnomalyEvent>> {
        self.events.clone()
    }

    /// Run one poll cycle for `connection_id` against `client`'s
    /// current `INFO` snapshot. Any error fetching the snapshot is
    /// transient I/O (§7): logged and swallowed, leaving other
    /// connections unaffected.
    pub async fn tick(&self, connection_id: &ConnectionId, client: &dyn DatabaseClient) {
        let info = match client.get_info().await {
            Ok(info) => info,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "failed to fetch info snapshot, skipping tick");
                return;
            }
        };

        let now_ms = self.clock.now_ms();
        let host = client.host().to_string();
        let port = client.port();

        for kind in MetricKind::ALL {
            let Some(value) = extractors::extract(kind, &info) else {
                continue;
            };
            self.process_metric(connection_id, kind, value, now_ms, &host, port).await;
        }
    }

    async fn process_metric(
        &self,
        connection_id: &ConnectionId,
        kind: MetricKind,
        value: f64,
        now_ms: i64,
        host: &str,
        port: u16,
    ) {
        let key = (connection_id.clone(), kind);
        let mut guard = self.state.write().await;
        let entry = guard.entry(key).or_insert_with(|| MetricState {
            buffer: MetricBuffer::new(self.buffer_capacity, self.min_samples),
            detector_state: DetectorState::default(),
        });

        entry.buffer.add(MetricSample {
            value,
            timestamp_ms: now_ms,
        });

        let detector = self.detectors.get(&kind).expect("detector registered for every MetricKind");
        let detection = detector.evaluate(&mut entry.detector_state, &entry.buffer, value, now_ms);
        drop(guard);

        let Some(detection) = detection else {
            return;
        };

        let event = AnomalyEvent {
            id: Uuid::new_v4(),
            timestamp: self.clock.now(),
            connection_id: connection_id.clone(),
            metric_kind: kind,
            kind: detection.kind,
            severity: detection.severity,
            value,
            baseline: detection.baseline,
            stddev: detection.stddev,
            z_score: detection.z_score,
            threshold: detection.threshold,
            message: format!(
                "{kind} {direction} to {value:.2} (baseline {baseline:.2}, z={z:.2})",
                direction = if detection.kind == AnomalyKind::Spike { "spiked" } else { "dropped" },
                baseline = detection.baseline,
                z = detection.z_score,
            ),
            correlation_id: None,
            related_metrics: Vec::new(),
            resolved: false,
            resolved_at: None,
            source_host: host.to_string(),
            source_port: port,
        };

        self.fire(event).await;
    }

    async fn fire(&self, event: AnomalyEvent) {
        metrics::counter!(
            fw_metrics::ANOMALIES_TOTAL,
            "severity" => event.severity.to_string(),
            "metric" => event.metric_kind.to_string(),
            "kind" => if event.kind == AnomalyKind::Spike { "spike" } else { "drop" },
            "connection_id" => event.connection_id.clone(),
        )
        .increment(1);

        debug!(
            connection_id = %event.connection_id,
            metric = %event.metric_kind,
            severity = %event.severity,
            value = event.value,
            "anomaly fired"
        );

        self.events.push(event.clone()).await;

        if let Err(err) = self.storage.save_anomaly_event(event.clone()).await {
            warn!(error = %err, "failed to persist anomaly event");
        }

        let payload = serde_json::json!({
            "id": event.id,
            "metricKind": event.metric_kind,
            "kind": event.kind,
            "severity": event.severity,
            "value": event.value,
            "baseline": event.baseline,
            "zScore": event.z_score,
            "threshold": event.threshold,
            "message": event.message,
        });
        self.dispatch
            .dispatch(
                "anomaly.detected",
                payload,
                event.connection_id.clone(),
                &event.source_host,
                event.source_port,
            )
            .await;

        self.dispatch_special_cases(&event).await;
    }

    /// §4.E's two dedicated dispatches, on top of the general
    /// `anomaly.detected` fan-out above.
    async fn dispatch_special_cases(&self, event: &AnomalyEvent) {
        if event.metric_kind == MetricKind::Connections && event.kind == AnomalyKind::Spike {
            let payload = serde_json::json!({
                "current": event.value,
                "baseline": event.baseline,
                "threshold": event.threshold,
            });
            self.dispatch
                .dispatch(
                    "connection.spike",
                    payload,
                    event.connection_id.clone(),
                    &event.source_host,
                    event.source_port,
                )
                .await;
        }

        if event.metric_kind == MetricKind::OpsPerSec && event.kind == AnomalyKind::Drop {
            let current_latency = if event.value == 0.0 {
                f64::INFINITY
            } else {
                event.baseline / event.value
            };
            let payload = serde_json::json!({
                "currentLatency": if current_latency.is_finite() { serde_json::json!(current_latency) } else { serde_json::json!("inf") },
                "baseline": 1.0,
                "threshold": event.threshold,
            });
            self.dispatch
                .dispatch(
                    "latency.spike",
                    payload,
                    event.connection_id.clone(),
                    &event.source_host,
                    event.source_port,
                )
                .await;
        }
    }

    /// Release per-connection buffer/detector state. Invoked by the
    /// supervisor's `onConnectionRemoved` hook (§4.D).
    pub async fn on_connection_removed(&self, connection_id: &ConnectionId) {
        self.state.write().await.retain(|(id, _), _| id != connection_id);
    }

    pub async fn buffer_snapshot(&self) -> Vec<(ConnectionId, MetricKind, fleetwatch_buffer::MetricStats)> {
        self.state
            .read()
            .await
            .iter()
            .map(|((conn, kind), state)| (conn.clone(), *kind, state.buffer.stats()))
            .collect()
    }

    pub fn detector_config(&self, kind: MetricKind) -> &DetectorConfig {
        self.detectors.get(&kind).expect("detector registered for every MetricKind").config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_common::types::Severity;
    use fleetwatch_common::{NullDispatch, SystemClock};
    use fleetwatch_dbclient::MockDatabaseClient;
    use fleetwatch_storage::InMemoryStorage;

    fn engine_with_defaults() -> Arc<AnomalyEngine> {
        AnomalyEngine::new(
            20,
            10,
            &HashMap::new(),
            1000,
            Arc::new(InMemoryStorage::new()),
            Arc::new(NullDispatch),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn warm_up_gate_blocks_events_before_min_samples() {
        let engine = engine_with_defaults();
        let info = "# Stats\r\ninstantaneous_ops_per_sec:100\r\n";
        let client = MockDatabaseClient::new("localhost", 6379, info);

        for _ in 0..9 {
            engine.tick(&"conn-a".to_string(), &client).await;
        }
        assert!(engine.events().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn missing_field_is_skipped_without_error() {
        let engine = engine_with_defaults();
        let client = MockDatabaseClient::new("localhost", 6379, "# Server\r\nredis_version:7.2.0\r\n");
        engine.tick(&"conn-a".to_string(), &client).await;
        assert!(engine.events().snapshot().await.is_empty());
        assert!(engine.buffer_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn acl_denied_spike_fires_after_warm_up_and_confirmation() {
        let engine = engine_with_defaults();
        for i in 0..12 {
            let value = 1 + (i % 2);
            let info = format!("# Stats\r\nrejected_connections:{value}\r\n");
            let client = MockDatabaseClient::new("db-1", 6379, &info);
            engine.tick(&"conn-a".to_string(), &client).await;
        }

        let spike_client = MockDatabaseClient::new("db-1", 6379, "# Stats\r\nrejected_connections:500\r\n");
        engine.tick(&"conn-a".to_string(), &spike_client).await;
        engine.tick(&"conn-a".to_string(), &spike_client).await;

        let events = engine.events().snapshot().await;
        assert!(events.iter().any(|e| e.metric_kind == MetricKind::AclDenied));
        assert_eq!(events.last().unwrap().source_host, "db-1");
    }

    #[tokio::test]
    async fn connection_removal_clears_per_connection_state() {
        let engine = engine_with_defaults();
        let client = MockDatabaseClient::new("localhost", 6379, "# Stats\r\ninstantaneous_ops_per_sec:100\r\n");
        engine.tick(&"conn-a".to_string(), &client).await;
        assert!(!engine.buffer_snapshot().await.is_empty());

        engine.on_connection_removed(&"conn-a".to_string()).await;
        assert!(engine.buffer_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn critical_memory_spike_is_classified_critical() {
        let engine = engine_with_defaults();
        for i in 0..12 {
            let value = 1_000_000 + (i % 2) * 1000;
            let info = format!("# Memory\r\nused_memory:{value}\r\n");
            let client = MockDatabaseClient::new("db-1", 6379, &info);
            engine.tick(&"conn-a".to_string(), &client).await;
        }
        let spike = MockDatabaseClient::new("db-1", 6379, "# Memory\r\nused_memory:100000000\r\n");
        engine.tick(&"conn-a".to_string(), &spike).await;
        engine.tick(&"conn-a".to_string(), &spike).await;

        let events = engine.events().snapshot().await;
        let memory_events: Vec<_> = events.iter().filter(|e| e.metric_kind == MetricKind::MemoryUsed).collect();
        assert!(!memory_events.is_empty());
        assert_eq!(memory_events.last().unwrap().severity, Severity::Critical);
    }
}
