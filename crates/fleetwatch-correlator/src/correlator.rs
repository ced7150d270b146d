//! Time-windowed anomaly correlator (component F, spec.md §4.F).
//!
//! Groups unassigned anomaly events on the same connection that fall
//! within `window_ms` of each other's group, classifies the resulting
//! group into a named pattern, and stamps every member with the
//! group's `correlationId`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use fleetwatch_common::types::{AnomalyEvent, ConnectionId, CorrelatedGroup};
use fleetwatch_common::{metrics as fw_metrics, Clock, EventDispatch, Ring};
use fleetwatch_storage::{CorrelatedGroupFilter, Storage};

use crate::patterns;

/// A group of events on one connection still being assembled, anchored
/// at its first member's timestamp. The GLOSSARY's correlation window
/// is the maximum span between a group's first and last event, so
/// membership is decided against the anchor, not the previous event.
struct OpenGroup {
    anchor_ms: i64,
    members: Vec<AnomalyEvent>,
}

pub struct Correlator {
    window_ms: i64,
    max_recent_groups: usize,
    events: Arc<Ring<AnomalyEvent>>,
    groups: Arc<Ring<CorrelatedGroup>>,
    storage: Arc<dyn Storage>,
    dispatch: Arc<dyn EventDispatch>,
    clock: Arc<dyn Clock>,
}

impl Correlator {
    /// `events` is the same ring the engine pushes fired anomalies
    /// into — shared, not copied, so a correlation-id stamp here is
    /// immediately visible to any other reader of that ring.
    pub fn new(
        window_ms: i64,
        max_recent_groups: usize,
        events: Arc<Ring<AnomalyEvent>>,
        storage: Arc<dyn Storage>,
        dispatch: Arc<dyn EventDispatch>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            window_ms,
            max_recent_groups,
            events,
            groups: Arc::new(Ring::new(max_recent_groups)),
            storage,
            dispatch,
            clock,
        })
    }

    pub fn groups(&self) -> Arc<Ring<CorrelatedGroup>> {
        self.groups.clone()
    }

    /// Run one correlation pass: bucket unassigned events by
    /// connection, sweep each bucket into candidate groups, and close
    /// out any group whose anchor has aged past the window.
    pub async fn tick(&self) {
        let candidates = self.events.snapshot_matching(|e| e.correlation_id.is_none() && !e.resolved).await;
        if candidates.is_empty() {
            return;
        }

        let mut buckets: HashMap<ConnectionId, Vec<AnomalyEvent>> = HashMap::new();
        for event in candidates {
            buckets.entry(event.connection_id.clone()).or_default().push(event);
        }

        let now_ms = self.clock.now_ms();

        for (connection_id, mut events) in buckets {
            events.sort_by_key(|e| e.timestamp);

            let mut open: Vec<OpenGroup> = Vec::new();
            for event in events {
                let ts_ms = event.timestamp.timestamp_millis();
                match open.last_mut() {
                    Some(group) if ts_ms - group.anchor_ms <= self.window_ms => {
                        group.members.push(event);
                    }
                    _ => {
                        open.push(OpenGroup {
                            anchor_ms: ts_ms,
                            members: vec![event],
                        });
                    }
                }
            }

            let last_index = open.len().saturating_sub(1);
            for (idx, group) in open.into_iter().enumerate() {
                let is_last = idx == last_index;
                let closed = !is_last || now_ms - group.anchor_ms > self.window_ms;
                if !closed {
                    continue;
                }
                if group.members.len() < 2 {
                    continue;
                }
                self.finalize_group(&connection_id, group.members).await;
            }
        }
    }

    async fn finalize_group(&self, connection_id: &ConnectionId, members: Vec<AnomalyEvent>) {
        let (source_host, source_port) = members
            .first()
            .map(|m| (m.source_host.clone(), m.source_port))
            .unwrap_or_default();
        let pattern = patterns::classify(&members);
        let severity = patterns::worst_severity(&members);
        let (diagnosis, recommendations) = patterns::diagnosis(pattern);
        let correlation_id = Uuid::new_v4();
        let member_ids: Vec<Uuid> = members.iter().map(|m| m.id).collect();

        let touched = self
            .events
            .update_matching(
                |e| member_ids.contains(&e.id),
                |e| e.correlation_id = Some(correlation_id),
            )
            .await;
        if touched != member_ids.len() {
            warn!(
                connection_id = %connection_id,
                expected = member_ids.len(),
                touched,
                "correlator stamped fewer ring members than expected, event may have been evicted mid-tick"
            );
        }

        for mut member in members {
            member.correlation_id = Some(correlation_id);
            if let Err(err) = self.storage.save_anomaly_event(member).await {
                warn!(error = %err, "failed to persist correlation-id stamp on anomaly event");
            }
        }

        let group = CorrelatedGroup {
            correlation_id,
            timestamp: self.clock.now(),
            connection_id: connection_id.clone(),
            pattern,
            severity,
            diagnosis,
            recommendations,
            anomalies: member_ids.clone(),
            resolved: false,
        };

        debug!(
            connection_id = %connection_id,
            pattern = %pattern,
            severity = %severity,
            members = member_ids.len(),
            "anomalies correlated"
        );

        self.groups.push(group.clone()).await;
        if let Err(err) = self.storage.save_correlated_group(group.clone()).await {
            warn!(error = %err, "failed to persist correlated group");
        }

        metrics::counter!(
            fw_metrics::CORRELATED_GROUPS_TOTAL,
            "pattern" => pattern.to_string(),
            "severity" => severity.to_string(),
        )
        .increment(1);

        let payload = serde_json::json!({
            "correlationId": group.correlation_id,
            "pattern": group.pattern,
            "severity": group.severity,
            "diagnosis": group.diagnosis,
            "recommendations": group.recommendations,
            "anomalies": group.anomalies,
        });
        self.dispatch
            .dispatch("group.correlated", payload, connection_id.clone(), &source_host, source_port)
            .await;
    }

    /// Recent correlated groups for `connection_id`, most-recent last,
    /// falling back to storage beyond what the in-memory ring retains.
    pub async fn recent_groups(&self, connection_id: &ConnectionId) -> Vec<CorrelatedGroup> {
        let from_ring = self.groups.snapshot_matching(|g| &g.connection_id == connection_id).await;
        if from_ring.len() >= self.max_recent_groups {
            return from_ring;
        }

        match self
            .storage
            .get_correlated_groups(CorrelatedGroupFilter {
                connection_id: Some(connection_id.clone()),
                ..Default::default()
            })
            .await
        {
            Ok(groups) => groups,
            Err(err) => {
                warn!(error = %err, "failed to read correlated groups from storage, serving ring snapshot only");
                from_ring
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_common::types::{AnomalyKind, MetricKind, Severity};
    use fleetwatch_common::{NullDispatch, TestClock};
    use fleetwatch_storage::InMemoryStorage;

    fn make_event(
        clock: &Arc<TestClock>,
        connection_id: &str,
        metric: MetricKind,
        severity: Severity,
    ) -> AnomalyEvent {
        AnomalyEvent {
            id: Uuid::new_v4(),
            timestamp: clock.now(),
            connection_id: connection_id.to_string(),
            metric_kind: metric,
            kind: AnomalyKind::Spike,
            severity,
            value: 0.0,
            baseline: 0.0,
            stddev: 0.0,
            z_score: 0.0,
            threshold: 0.0,
            message: String::new(),
            correlation_id: None,
            related_metrics: vec![],
            resolved: false,
            resolved_at: None,
            source_host: "localhost".to_string(),
            source_port: 6379,
        }
    }

    async fn correlator_with(events: Arc<Ring<AnomalyEvent>>) -> (Arc<Correlator>, Arc<TestClock>, Arc<InMemoryStorage>) {
        let clock = TestClock::new(chrono::Utc::now());
        let storage = Arc::new(InMemoryStorage::new());
        let correlator = Correlator::new(
            30_000,
            100,
            events,
            storage.clone(),
            Arc::new(NullDispatch),
            clock.clone(),
        );
        (correlator, clock, storage)
    }

    #[tokio::test]
    async fn memory_pressure_pattern_closes_within_window() {
        let events: Arc<Ring<AnomalyEvent>> = Arc::new(Ring::new(100));
        let (correlator, clock, _storage) = correlator_with(events.clone()).await;

        let e1 = make_event(&clock, "conn-a", MetricKind::MemoryUsed, Severity::Critical);
        events.push(e1).await;

        clock.advance(chrono::Duration::seconds(10));
        let e2 = make_event(&clock, "conn-a", MetricKind::EvictedKeys, Severity::Warning);
        events.push(e2).await;

        clock.advance(chrono::Duration::seconds(31));
        correlator.tick().await;

        let groups = correlator.groups().snapshot().await;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].pattern, fleetwatch_common::types::Pattern::MemoryPressure);
        assert_eq!(groups[0].severity, Severity::Critical);
        assert_eq!(groups[0].anomalies.len(), 2);

        let stamped = events.snapshot().await;
        assert!(stamped.iter().all(|e| e.correlation_id == Some(groups[0].correlation_id)));
    }

    #[tokio::test]
    async fn single_event_never_forms_a_group() {
        let events: Arc<Ring<AnomalyEvent>> = Arc::new(Ring::new(100));
        let (correlator, clock, _storage) = correlator_with(events.clone()).await;

        let e1 = make_event(&clock, "conn-a", MetricKind::MemoryUsed, Severity::Warning);
        events.push(e1).await;

        clock.advance(chrono::Duration::seconds(31));
        correlator.tick().await;

        assert!(correlator.groups().snapshot().await.is_empty());
        let stamped = events.snapshot().await;
        assert!(stamped[0].correlation_id.is_none());
    }

    #[tokio::test]
    async fn events_outside_window_stay_unassigned_until_late_arrival_check() {
        let events: Arc<Ring<AnomalyEvent>> = Arc::new(Ring::new(100));
        let (correlator, clock, _storage) = correlator_with(events.clone()).await;

        let e1 = make_event(&clock, "conn-a", MetricKind::MemoryUsed, Severity::Warning);
        events.push(e1).await;

        clock.advance(chrono::Duration::seconds(40));
        let e2 = make_event(&clock, "conn-a", MetricKind::EvictedKeys, Severity::Warning);
        events.push(e2).await;

        // e2 is outside e1's 30s window, so two separate open groups form;
        // only e1's (now stale) group is closed, each with one member.
        correlator.tick().await;
        assert!(correlator.groups().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn different_connections_never_share_a_group() {
        let events: Arc<Ring<AnomalyEvent>> = Arc::new(Ring::new(100));
        let (correlator, clock, _storage) = correlator_with(events.clone()).await;

        events.push(make_event(&clock, "conn-a", MetricKind::MemoryUsed, Severity::Warning)).await;
        events.push(make_event(&clock, "conn-b", MetricKind::EvictedKeys, Severity::Warning)).await;

        clock.advance(chrono::Duration::seconds(31));
        correlator.tick().await;

        assert!(correlator.groups().snapshot().await.is_empty());
    }
}
