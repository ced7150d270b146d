use fleetwatch_common::types::{AnomalyKind, Direction, Severity};

use crate::buffer::{MetricBuffer, MetricStats};

/// Tuning for one (connection, metric) detector instance. Defaults
/// chosen so a freshly-registered connection behaves reasonably before
/// any per-metric override is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub warn_z: f64,
    pub crit_z: f64,
    pub consecutive_required: u32,
    pub cooldown_ms: i64,
    pub hysteresis_ratio: f64,
    /// Absolute warning/critical bounds, OR'd with the z-score bounds
    /// (spec.md §3 `warnAbs?`/`critAbs?`, §4.B steps 4-5): a metric
    /// sitting steadily at a dangerous absolute level with near-zero
    /// variance still fires even though its z-score never clears the
    /// warn/crit z thresholds.
    pub warn_abs: Option<f64>,
    pub crit_abs: Option<f64>,
    pub direction: Direction,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            warn_z: 2.0,
            crit_z: 3.0,
            consecutive_required: 2,
            cooldown_ms: 30_000,
            hysteresis_ratio: 0.7,
            warn_abs: None,
            crit_abs: None,
            direction: Direction::Both,
        }
    }
}

/// Per-(connection, metric) detector memory: consecutive-tier streak,
/// the severity currently considered "active" (for hysteresis release),
/// and the cooldown expiry. Owned and persisted by the caller (the
/// engine), one instance per tracked metric.
#[derive(Debug, Clone, Default)]
pub struct DetectorState {
    consecutive_count: u32,
    pending_kind: Option<AnomalyKind>,
    active_severity: Option<Severity>,
    cooldown_until_ms: Option<i64>,
}

impl DetectorState {
    pub fn is_active(&self) -> bool {
        self.active_severity.is_some()
    }
}

/// Outcome of a single detector evaluation that resulted in a firing
/// anomaly (a `None` return from `Detector::evaluate` means "no
/// anomaly this sample" and carries no data).
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub z_score: f64,
    pub baseline: f64,
    pub stddev: f64,
    pub threshold: f64,
}

/// Two-tier (warn/critical) z-score spike/drop detector with warm-up,
/// hysteresis, consecutive-sample confirmation, and cooldown.
pub struct Detector {
    config: DetectorConfig,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Evaluate the latest sample already pushed into `buffer` against
    /// `state`, mutating `state` in place. `now_ms` drives cooldown
    /// expiry so tests can advance time deterministically.
    pub fn evaluate(
        &self,
        state: &mut DetectorState,
        buffer: &MetricBuffer,
        value: f64,
        now_ms: i64,
    ) -> Option<Detection> {
        if !buffer.is_warm() {
            return None;
        }

        let stats = buffer.stats();

        let (kind, z) = match self.classify_direction(&stats, value) {
            Some(pair) => pair,
            None => {
                self.reset_streak(state);
                return None;
            }
        };

        let tier = self.tier_for(z.abs(), value, kind, state);
        let Some(severity) = tier else {
            self.reset_streak(state);
            self.maybe_clear(state, now_ms);
            return None;
        };

        if state.pending_kind == Some(kind) {
            state.consecutive_count += 1;
        } else {
            state.pending_kind = Some(kind);
            state.consecutive_count = 1;
        }

        if state.consecutive_count < self.config.consecutive_required {
            return None;
        }

        if self.in_cooldown(state, now_ms) && !self.escalates(state, severity) {
            return None;
        }

        state.active_severity = Some(severity);
        state.cooldown_until_ms = Some(now_ms + self.config.cooldown_ms);

        Some(Detection {
            kind,
            severity,
            z_score: z,
            baseline: stats.mean,
            stddev: stats.stddev,
            threshold: self.threshold_for(severity),
        })
    }

    /// Classify `value` against `stats`, honoring the configured
    /// direction. When the buffer has meaningful variance the kind
    /// follows the z-score's sign and `z` is that score; when
    /// `stddev <= f64::EPSILON` (spec.md §4.B step 2, "only absolute
    /// thresholds apply") there is no variance to score against, so
    /// `z` is reported as `0.0` and the kind falls back to the
    /// direction the absolute bounds are meant to watch (a drop-only
    /// metric watches for a floor breach, everything else watches for
    /// a ceiling breach).
    fn classify_direction(&self, stats: &MetricStats, value: f64) -> Option<(AnomalyKind, f64)> {
        let (kind, z) = if stats.stddev > f64::EPSILON {
            let z = (value - stats.mean) / stats.stddev;
            let kind = if z >= 0.0 { AnomalyKind::Spike } else { AnomalyKind::Drop };
            (kind, z)
        } else {
            let kind = match self.config.direction {
                Direction::DropOnly => AnomalyKind::Drop,
                Direction::SpikeOnly | Direction::Both => AnomalyKind::Spike,
            };
            (kind, 0.0)
        };

        match (self.config.direction, kind) {
            (Direction::Both, _) => Some((kind, z)),
            (Direction::SpikeOnly, AnomalyKind::Spike) => Some((kind, z)),
            (Direction::DropOnly, AnomalyKind::Drop) => Some((kind, z)),
            _ => None,
        }
    }

    /// Pick the tier `value`/`abs_z` falls into: the z-score bounds
    /// and the absolute bounds are OR'd together (spec.md §4.B steps
    /// 4-5), so crossing either one at a severity is enough to reach
    /// it. Hysteresis on the z-path keeps the detector's current
    /// severity active while a metric oscillates right at the
    /// boundary rather than flapping.
    fn tier_for(&self, abs_z: f64, value: f64, kind: AnomalyKind, state: &DetectorState) -> Option<Severity> {
        if abs_z >= self.config.crit_z || self.crosses_abs(kind, value, self.config.crit_abs) {
            return Some(Severity::Critical);
        }
        if abs_z >= self.config.warn_z || self.crosses_abs(kind, value, self.config.warn_abs) {
            return Some(Severity::Warning);
        }
        if state.is_active() {
            let clear_floor = self.config.warn_z * self.config.hysteresis_ratio;
            if abs_z >= clear_floor {
                return state.active_severity;
            }
        }
        None
    }

    /// Whether `value` crosses an absolute bound in the direction
    /// `kind` watches: a spike bound is a ceiling (value at or above
    /// it is anomalous), a drop bound is a floor (value at or below
    /// it is anomalous). `None` never crosses.
    fn crosses_abs(&self, kind: AnomalyKind, value: f64, bound: Option<f64>) -> bool {
        match (kind, bound) {
            (AnomalyKind::Spike, Some(bound)) => value >= bound,
            (AnomalyKind::Drop, Some(bound)) => value <= bound,
            (_, None) => false,
        }
    }

    fn threshold_for(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.config.crit_z,
            _ => self.config.warn_z,
        }
    }

    fn in_cooldown(&self, state: &DetectorState, now_ms: i64) -> bool {
        state.cooldown_until_ms.map(|until| now_ms < until).unwrap_or(false)
    }

    /// A critical reading bypasses an active warn-level cooldown —
    /// escalation should never be suppressed.
    fn escalates(&self, state: &DetectorState, severity: Severity) -> bool {
        match state.active_severity {
            Some(active) => severity > active,
            None => true,
        }
    }

    fn reset_streak(&self, state: &mut DetectorState) {
        state.consecutive_count = 0;
        state.pending_kind = None;
    }

    fn maybe_clear(&self, state: &mut DetectorState, now_ms: i64) {
        if let Some(until) = state.cooldown_until_ms {
            if now_ms >= until {
                state.active_severity = None;
                state.cooldown_until_ms = None;
            }
        }
    }
}
