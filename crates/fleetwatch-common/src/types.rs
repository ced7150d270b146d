//! Shared domain types for FleetWatch
//!
//! These types cross crate boundaries (engine, correlator, webhook,
//! storage, gateway) and so live in the common crate rather than being
//! duplicated per-component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifier of a monitored database connection. User-supplied at
/// registration time (e.g. "prod-cache-1"), not a generated UUID.
pub type ConnectionId = String;

/// Epoch-millisecond timestamp, used instead of `DateTime<Utc>` in the
/// hot path (buffer/detector) to keep samples `Copy`.
pub type EpochMs = i64;

/// Monitored metric kinds, per spec.md §4.E's extractor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Connections,
    OpsPerSec,
    MemoryUsed,
    InputKbps,
    OutputKbps,
    SlowlogCount,
    AclDenied,
    EvictedKeys,
    BlockedClients,
    KeyspaceMisses,
    FragmentationRatio,
}

impl MetricKind {
    /// All metric kinds the engine extracts by default.
    pub const ALL: [MetricKind; 11] = [
        MetricKind::Connections,
        MetricKind::OpsPerSec,
        MetricKind::MemoryUsed,
        MetricKind::InputKbps,
        MetricKind::OutputKbps,
        MetricKind::SlowlogCount,
        MetricKind::AclDenied,
        MetricKind::EvictedKeys,
        MetricKind::BlockedClients,
        MetricKind::KeyspaceMisses,
        MetricKind::FragmentationRatio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Connections => "connections",
            MetricKind::OpsPerSec => "ops_per_sec",
            MetricKind::MemoryUsed => "memory_used",
            MetricKind::InputKbps => "input_kbps",
            MetricKind::OutputKbps => "output_kbps",
            MetricKind::SlowlogCount => "slowlog_count",
            MetricKind::AclDenied => "acl_denied",
            MetricKind::EvictedKeys => "evicted_keys",
            MetricKind::BlockedClients => "blocked_clients",
            MetricKind::KeyspaceMisses => "keyspace_misses",
            MetricKind::FragmentationRatio => "fragmentation_ratio",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction a detector is allowed to fire in, per (connection, metric).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    SpikeOnly,
    DropOnly,
    Both,
}

/// Whether a fired anomaly was an upward or downward deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Spike,
    Drop,
}

/// Severity, ordered `Info < Warning < Critical` so `max()` picks the
/// worst severity in a set (used by the correlator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// A single detected anomaly, as specified in spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub connection_id: ConnectionId,
    pub metric_kind: MetricKind,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub value: f64,
    pub baseline: f64,
    pub stddev: f64,
    pub z_score: f64,
    pub threshold: f64,
    pub message: String,
    pub correlation_id: Option<Uuid>,
    pub related_metrics: Vec<MetricKind>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub source_host: String,
    pub source_port: u16,
}

/// Named diagnostic pattern a `CorrelatedGroup` is labelled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pattern {
    CascadingFailure,
    MemoryPressure,
    TrafficSurge,
    AuthStorm,
    ReplicationStress,
    SlowQueryBurst,
    EvictionCascade,
    FragmentationDrift,
    Unknown,
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Pattern::CascadingFailure => "cascading-failure",
            Pattern::MemoryPressure => "memory-pressure",
            Pattern::TrafficSurge => "traffic-surge",
            Pattern::AuthStorm => "auth-storm",
            Pattern::ReplicationStress => "replication-stress",
            Pattern::SlowQueryBurst => "slow-query-burst",
            Pattern::EvictionCascade => "eviction-cascade",
            Pattern::FragmentationDrift => "fragmentation-drift",
            Pattern::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A time-windowed group of correlated anomalies, per spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedGroup {
    pub correlation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub connection_id: ConnectionId,
    pub pattern: Pattern,
    pub severity: Severity,
    pub diagnosis: String,
    pub recommendations: Vec<String>,
    pub anomalies: Vec<Uuid>,
    pub resolved: bool,
}

/// Retry policy attached to a webhook subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

/// Per-delivery timeout / body-truncation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub timeout_ms: u64,
    pub max_response_body_bytes: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_response_body_bytes: 4096,
        }
    }
}

/// Alert-specific tuning for a subscriber (threshold-gate hysteresis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub hysteresis_factor: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            hysteresis_factor: 0.9,
        }
    }
}

/// A registered webhook subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub secret: String,
    pub events: Vec<String>,
    pub headers: HashMap<String, String>,
    pub retry_policy: RetryPolicy,
    pub delivery_config: DeliveryConfig,
    pub alert_config: AlertConfig,
    pub thresholds: HashMap<String, f64>,
    pub connection_id: Option<ConnectionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    /// Mask the secret for any caller-facing representation: first 10
    /// characters followed by `***` (spec.md §4.G sensitive-data rule).
    pub fn masked_secret(&self) -> String {
        let take = self.secret.char_indices().nth(10).map(|(i, _)| i).unwrap_or(self.secret.len());
        format!("{}***", &self.secret[..take])
    }
}

/// Delivery lifecycle status, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Success,
    Failed,
    DeadLetter,
}

/// A single webhook delivery attempt record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_kind: String,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl WebhookDelivery {
    /// A `failed` delivery that exhausted its retry budget is a dead letter
    /// when viewed through the DLQ (spec.md §3 lifecycle note).
    pub fn is_dead_letter(&self, max_retries: u32) -> bool {
        self.status == DeliveryStatus::Failed && self.attempts >= max_retries
    }
}

/// Connection metadata held by the registry and echoed on every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub tls: bool,
}
