//! Per-(subscriber, thresholdKey) activation gate, spec.md §4.H. Keeps
//! a webhook from re-firing on every tick while a threshold-kind
//! condition stays crossed, and recognizes recovery once the value
//! drops back below `threshold * hysteresisFactor`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use fleetwatch_common::metrics as fw_metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Fire,
    Suppress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    Cleared,
    StillActive,
}

#[derive(Debug, Clone)]
struct GateState {
    active: bool,
    activated_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct ThresholdGate {
    state: RwLock<HashMap<(Uuid, String), GateState>>,
}

impl ThresholdGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `activate` — if not already active and `value >= threshold`,
    /// flips to active and reports `Fire`. If already active, reports
    /// `Suppress` so the caller skips this subscriber.
    pub async fn activate(
        &self,
        subscriber_id: Uuid,
        key: &str,
        value: f64,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> GateOutcome {
        if value < threshold {
            return GateOutcome::Suppress;
        }

        let mut guard = self.state.write().await;
        let entry = guard.entry((subscriber_id, key.to_string())).or_insert(GateState {
            active: false,
            activated_at: None,
        });

        if entry.active {
            return GateOutcome::Suppress;
        }

        entry.active = true;
        entry.activated_at = Some(now);
        self.update_active_gauge(&guard).await;
        GateOutcome::Fire
    }

    /// `clear` — if active and `value <= threshold * hysteresisFactor`,
    /// flips back to inactive, signalling the caller may emit a
    /// recovery event.
    pub async fn clear(
        &self,
        subscriber_id: Uuid,
        key: &str,
        value: f64,
        threshold: f64,
        hysteresis_factor: f64,
    ) -> ClearOutcome {
        let mut guard = self.state.write().await;
        let Some(entry) = guard.get_mut(&(subscriber_id, key.to_string())) else {
            return ClearOutcome::StillActive;
        };

        if entry.active && value <= threshold * hysteresis_factor {
            entry.active = false;
            entry.activated_at = None;
            self.update_active_gauge(&guard).await;
            return ClearOutcome::Cleared;
        }

        ClearOutcome::StillActive
    }

    async fn update_active_gauge(&self, guard: &HashMap<(Uuid, String), GateState>) {
        let active_count = guard.values().filter(|s| s.active).count();
        metrics::gauge!(fw_metrics::THRESHOLD_GATE_ACTIVE).set(active_count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_once_then_suppresses_while_active() {
        let gate = ThresholdGate::new();
        let sub = Uuid::new_v4();
        let now = Utc::now();

        let first = gate.activate(sub, "memory.critical", 95.0, 90.0, now).await;
        assert_eq!(first, GateOutcome::Fire);

        let second = gate.activate(sub, "memory.critical", 97.0, 90.0, now).await;
        assert_eq!(second, GateOutcome::Suppress);
    }

    #[tokio::test]
    async fn below_threshold_never_fires() {
        let gate = ThresholdGate::new();
        let sub = Uuid::new_v4();
        let outcome = gate.activate(sub, "memory.critical", 50.0, 90.0, Utc::now()).await;
        assert_eq!(outcome, GateOutcome::Suppress);
    }

    #[tokio::test]
    async fn clear_requires_hysteresis_margin_not_just_below_threshold() {
        let gate = ThresholdGate::new();
        let sub = Uuid::new_v4();
        let now = Utc::now();
        gate.activate(sub, "memory.critical", 95.0, 90.0, now).await;

        // 85 is below the 90 threshold but above 90*0.9=81, so it should not clear yet.
        let still_active = gate.clear(sub, "memory.critical", 85.0, 90.0, 0.9).await;
        assert_eq!(still_active, ClearOutcome::StillActive);

        let cleared = gate.clear(sub, "memory.critical", 80.0, 90.0, 0.9).await;
        assert_eq!(cleared, ClearOutcome::Cleared);

        let fires_again = gate.activate(sub, "memory.critical", 95.0, 90.0, now).await;
        assert_eq!(fires_again, GateOutcome::Fire);
    }

    #[tokio::test]
    async fn gate_state_is_per_subscriber() {
        let gate = ThresholdGate::new();
        let sub_a = Uuid::new_v4();
        let sub_b = Uuid::new_v4();
        gate.activate(sub_a, "memory.critical", 95.0, 90.0, Utc::now()).await;

        let b_outcome = gate.activate(sub_b, "memory.critical", 95.0, 90.0, Utc::now()).await;
        assert_eq!(b_outcome, GateOutcome::Fire);
    }
}
