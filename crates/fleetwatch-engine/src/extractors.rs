//! Metric extractors and per-metric detector tuning, per spec.md
//! §4.E's extraction table. Each extractor pulls a single numeric value
//! out of a parsed `INFO` snapshot, or reports the field is absent so
//! the engine can skip that metric for this tick (§7 "capability
//! missing" — no event is generated, nothing is logged as an error).

use fleetwatch_buffer::DetectorConfig;
use fleetwatch_common::config::DetectorOverride;
use fleetwatch_common::types::{Direction, MetricKind};
use fleetwatch_dbclient::InfoSnapshot;

/// Pull `kind`'s configured value out of `info`, or `None` if the
/// backing field(s) are absent from this snapshot.
pub fn extract(kind: MetricKind, info: &InfoSnapshot) -> Option<f64> {
    match kind {
        MetricKind::Connections => info.find_f64("connected_clients"),
        MetricKind::OpsPerSec => info.find_f64("instantaneous_ops_per_sec"),
        MetricKind::MemoryUsed => info.find_f64("used_memory"),
        MetricKind::InputKbps => info.find_f64("instantaneous_input_kbps"),
        MetricKind::OutputKbps => info.find_f64("instantaneous_output_kbps"),
        MetricKind::SlowlogCount => info.find_f64("slowlog_len"),
        MetricKind::AclDenied => {
            let rejected = info.find_f64("rejected_connections");
            let acl_denied = info.find_f64("acl_access_denied_auth");
            match (rejected, acl_denied) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
            }
        }
        MetricKind::EvictedKeys => info.find_f64("evicted_keys"),
        MetricKind::BlockedClients => info.find_f64("blocked_clients"),
        MetricKind::KeyspaceMisses => info.find_f64("keyspace_misses"),
        MetricKind::FragmentationRatio => info.find_f64("mem_fragmentation_ratio"),
    }
}

/// Default detector tuning for `kind`, before any
/// `[detectors.<kind>]` config override is merged in.
pub fn default_detector_config(kind: MetricKind) -> DetectorConfig {
    let base = DetectorConfig::default();
    match kind {
        MetricKind::Connections
        | MetricKind::OpsPerSec
        | MetricKind::InputKbps
        | MetricKind::OutputKbps
        | MetricKind::BlockedClients => DetectorConfig {
            direction: Direction::Both,
            ..base
        },
        MetricKind::MemoryUsed => DetectorConfig {
            direction: Direction::SpikeOnly,
            warn_z: 2.5,
            crit_z: 4.0,
            ..base
        },
        MetricKind::SlowlogCount | MetricKind::EvictedKeys | MetricKind::KeyspaceMisses => DetectorConfig {
            direction: Direction::SpikeOnly,
            ..base
        },
        // spec.md §3: "ACL-denied uses absolute thresholds in addition
        // to z". A burst of denials is meaningful even against a
        // near-zero, near-constant baseline, where the z-path alone
        // would never trip.
        MetricKind::AclDenied => DetectorConfig {
            direction: Direction::SpikeOnly,
            warn_abs: Some(10.0),
            crit_abs: Some(50.0),
            ..base
        },
        MetricKind::FragmentationRatio => DetectorConfig {
            direction: Direction::SpikeOnly,
            warn_z: 2.0,
            crit_z: 3.0,
            warn_abs: Some(1.5),
            crit_abs: Some(2.0),
            ..base
        },
    }
}

/// Merge a `[detectors.<kind>]` override from config over the
/// per-metric default, field by field.
pub fn merge_override(base: DetectorConfig, over: &DetectorOverride) -> DetectorConfig {
    DetectorConfig {
        warn_z: over.warn_z.unwrap_or(base.warn_z),
        crit_z: over.crit_z.unwrap_or(base.crit_z),
        consecutive_required: over.consecutive_required.unwrap_or(base.consecutive_required),
        cooldown_ms: over.cooldown_ms.map(|ms| ms as i64).unwrap_or(base.cooldown_ms),
        hysteresis_ratio: over.hysteresis_ratio.unwrap_or(base.hysteresis_ratio),
        warn_abs: over.warn_abs.or(base.warn_abs),
        crit_abs: over.crit_abs.or(base.crit_abs),
        direction: over.direction.unwrap_or(base.direction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acl_denied_sums_both_source_fields() {
        let info = InfoSnapshot::parse("# Stats\r\nrejected_connections:4\r\nacl_access_denied_auth:6\r\n");
        assert_eq!(extract(MetricKind::AclDenied, &info), Some(10.0));
    }

    #[test]
    fn acl_denied_absent_when_neither_field_present() {
        let info = InfoSnapshot::parse("# Stats\r\n");
        assert_eq!(extract(MetricKind::AclDenied, &info), None);
    }

    #[test]
    fn memory_used_is_spike_only_by_default() {
        let cfg = default_detector_config(MetricKind::MemoryUsed);
        assert_eq!(cfg.direction, Direction::SpikeOnly);
    }

    #[test]
    fn fragmentation_ratio_carries_absolute_bounds() {
        let cfg = default_detector_config(MetricKind::FragmentationRatio);
        assert_eq!(cfg.warn_abs, Some(1.5));
        assert_eq!(cfg.crit_abs, Some(2.0));
    }

    #[test]
    fn acl_denied_carries_absolute_bounds_alongside_z() {
        let cfg = default_detector_config(MetricKind::AclDenied);
        assert_eq!(cfg.warn_abs, Some(10.0));
        assert_eq!(cfg.crit_abs, Some(50.0));
    }

    #[test]
    fn override_replaces_only_specified_fields() {
        let base = default_detector_config(MetricKind::Connections);
        let over = DetectorOverride {
            warn_z: Some(9.0),
            crit_z: None,
            consecutive_required: None,
            cooldown_ms: None,
            hysteresis_ratio: None,
            warn_abs: None,
            crit_abs: None,
            direction: None,
        };
        let merged = merge_override(base.clone(), &over);
        assert_eq!(merged.warn_z, 9.0);
        assert_eq!(merged.crit_z, base.crit_z);
    }
}
