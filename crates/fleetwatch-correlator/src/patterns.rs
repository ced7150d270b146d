//! Pattern matching and static diagnosis templates, per spec.md §4.F
//! step 3/5. First match wins, evaluated in priority order.

use std::collections::HashSet;

use fleetwatch_common::types::{AnomalyEvent, AnomalyKind, MetricKind, Pattern, Severity};

/// Classify a closed group of (already timestamp-ordered) anomaly
/// events into a named failure pattern.
pub fn classify(members: &[AnomalyEvent]) -> Pattern {
    let kinds: HashSet<MetricKind> = members.iter().map(|m| m.metric_kind).collect();
    let has = |k: MetricKind| kinds.contains(&k);
    let has_critical = members.iter().any(|m| m.severity == Severity::Critical);

    let acl_critical_count = members
        .iter()
        .filter(|m| m.metric_kind == MetricKind::AclDenied && m.severity == Severity::Critical)
        .count();
    if acl_critical_count >= 1 && members.len() >= 2 {
        return Pattern::AuthStorm;
    }

    if has(MetricKind::MemoryUsed) && (has(MetricKind::EvictedKeys) || has(MetricKind::FragmentationRatio)) {
        return Pattern::MemoryPressure;
    }

    if kinds.len() >= 3 && has_critical {
        return Pattern::CascadingFailure;
    }

    let ops_spike = members.iter().any(|m| m.metric_kind == MetricKind::OpsPerSec && m.kind == AnomalyKind::Spike);
    let connections_spike = members.iter().any(|m| m.metric_kind == MetricKind::Connections && m.kind == AnomalyKind::Spike);
    if ops_spike && connections_spike {
        return Pattern::TrafficSurge;
    }

    let ops_drop = members.iter().any(|m| m.metric_kind == MetricKind::OpsPerSec && m.kind == AnomalyKind::Drop);
    if has(MetricKind::SlowlogCount) && ops_drop {
        return Pattern::SlowQueryBurst;
    }

    if has(MetricKind::EvictedKeys) && has(MetricKind::MemoryUsed) {
        return Pattern::EvictionCascade;
    }

    let fragmentation_count = members.iter().filter(|m| m.metric_kind == MetricKind::FragmentationRatio).count();
    if fragmentation_count >= 3 {
        return Pattern::FragmentationDrift;
    }

    Pattern::Unknown
}

/// Worst severity across a group's members.
pub fn worst_severity(members: &[AnomalyEvent]) -> Severity {
    members.iter().map(|m| m.severity).max().unwrap_or(Severity::Info)
}

/// Static diagnosis + recommendations keyed by pattern. Wording is an
/// implementation choice (spec.md §4.F step 5); content must describe
/// probable cause and suggested operator action.
pub fn diagnosis(pattern: Pattern) -> (String, Vec<String>) {
    match pattern {
        Pattern::AuthStorm => (
            "Repeated ACL/auth rejections suggest a credential-stuffing attempt or a \
             misconfigured client retrying with stale credentials.".to_string(),
            vec![
                "Review recent ACL denial logs for the source IP(s) involved".to_string(),
                "Rotate credentials for any client that should not be failing auth".to_string(),
                "Consider a temporary connection-rate limit on the offending source".to_string(),
            ],
        ),
        Pattern::MemoryPressure => (
            "Memory usage is climbing alongside evictions or rising fragmentation, \
             indicating the instance is approaching its configured memory ceiling."
                .to_string(),
            vec![
                "Check maxmemory and maxmemory-policy for this instance".to_string(),
                "Look for a recent increase in key count or value size".to_string(),
                "Consider scaling memory or adding a node before evictions affect callers".to_string(),
            ],
        ),
        Pattern::CascadingFailure => (
            "Multiple unrelated metrics degraded together with at least one critical \
             reading, consistent with a cascading failure originating upstream of this \
             instance."
                .to_string(),
            vec![
                "Check host-level resource pressure (CPU, disk I/O, network)".to_string(),
                "Correlate against deploys or config changes around this timestamp".to_string(),
                "Escalate to on-call if the pattern persists past one correlation window".to_string(),
            ],
        ),
        Pattern::TrafficSurge => (
            "Operation throughput and client connection count both spiked together, \
             consistent with a legitimate traffic surge or a retry storm."
                .to_string(),
            vec![
                "Compare against expected traffic for this time window".to_string(),
                "Check whether a caller is retrying aggressively against errors".to_string(),
                "Confirm connection pool limits upstream are sized for the surge".to_string(),
            ],
        ),
        Pattern::SlowQueryBurst => (
            "A burst of slow commands coincided with a drop in throughput, suggesting \
             one or more expensive operations are blocking the event loop."
                .to_string(),
            vec![
                "Inspect SLOWLOG for the offending commands".to_string(),
                "Check for unindexed lookups or large collection scans".to_string(),
                "Consider moving expensive operations off the hot path".to_string(),
            ],
        ),
        Pattern::EvictionCascade => (
            "Key evictions are rising together with memory usage, indicating the working \
             set no longer fits within the configured memory bound."
                .to_string(),
            vec![
                "Review eviction policy against the actual access pattern".to_string(),
                "Identify the largest keys or namespaces driving memory growth".to_string(),
                "Plan a capacity increase if evictions are affecting cache hit rate".to_string(),
            ],
        ),
        Pattern::FragmentationDrift => (
            "Memory fragmentation ratio has remained elevated across several consecutive \
             samples, which typically requires a restart or active defragmentation to \
             resolve."
                .to_string(),
            vec![
                "Check whether active-defrag is enabled and tuned appropriately".to_string(),
                "Schedule a maintenance-window restart if fragmentation keeps climbing".to_string(),
                "Review allocator settings (jemalloc) for this workload".to_string(),
            ],
        ),
        Pattern::ReplicationStress => (
            "Replication-related signals indicate the replica is falling behind or \
             reconnecting more than expected."
                .to_string(),
            vec![
                "Check replica lag and link status".to_string(),
                "Verify network stability between primary and replica".to_string(),
            ],
        ),
        Pattern::Unknown => (
            "Co-occurring anomalies did not match a known failure pattern.".to_string(),
            vec!["Review the individual anomaly events for this connection".to_string()],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(metric: MetricKind, kind: AnomalyKind, severity: Severity) -> AnomalyEvent {
        AnomalyEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            connection_id: "conn-a".to_string(),
            metric_kind: metric,
            kind,
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

    #[test]
    fn memory_pressure_requires_memory_and_eviction_or_fragmentation() {
        let members = vec![
            event(MetricKind::MemoryUsed, AnomalyKind::Spike, Severity::Critical),
            event(MetricKind::EvictedKeys, AnomalyKind::Spike, Severity::Warning),
        ];
        assert_eq!(classify(&members), Pattern::MemoryPressure);
    }

    #[test]
    fn auth_storm_requires_critical_acl_denial_and_two_members() {
        let members = vec![
            event(MetricKind::AclDenied, AnomalyKind::Spike, Severity::Critical),
            event(MetricKind::Connections, AnomalyKind::Spike, Severity::Warning),
        ];
        assert_eq!(classify(&members), Pattern::AuthStorm);
    }

    #[test]
    fn single_acl_critical_event_alone_is_not_auth_storm() {
        let members = vec![event(MetricKind::AclDenied, AnomalyKind::Spike, Severity::Critical)];
        assert_eq!(classify(&members), Pattern::Unknown);
    }

    #[test]
    fn traffic_surge_requires_ops_and_connection_spikes() {
        let members = vec![
            event(MetricKind::OpsPerSec, AnomalyKind::Spike, Severity::Warning),
            event(MetricKind::Connections, AnomalyKind::Spike, Severity::Warning),
        ];
        assert_eq!(classify(&members), Pattern::TrafficSurge);
    }

    #[test]
    fn cascading_failure_requires_three_kinds_and_a_critical() {
        let members = vec![
            event(MetricKind::OpsPerSec, AnomalyKind::Drop, Severity::Warning),
            event(MetricKind::BlockedClients, AnomalyKind::Spike, Severity::Warning),
            event(MetricKind::InputKbps, AnomalyKind::Drop, Severity::Critical),
        ];
        assert_eq!(classify(&members), Pattern::CascadingFailure);
    }

    #[test]
    fn worst_severity_picks_the_max() {
        let members = vec![
            event(MetricKind::OpsPerSec, AnomalyKind::Spike, Severity::Info),
            event(MetricKind::Connections, AnomalyKind::Spike, Severity::Critical),
        ];
        assert_eq!(worst_severity(&members), Severity::Critical);
    }
}
