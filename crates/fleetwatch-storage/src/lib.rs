//! Storage port: the persistence boundary the rest of FleetWatch talks
//! to, and one in-process implementation of it.

mod in_memory;

pub use in_memory::InMemoryStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use fleetwatch_common::types::{
    AnomalyEvent, ConnectionId, CorrelatedGroup, MetricKind, Pattern, Severity, WebhookDelivery,
    WebhookSubscription,
};
use fleetwatch_common::Result;

/// Filter applied when listing anomaly events. Every field is additive
/// (AND-combined); `connection_id` is mandatory at the call sites that
/// enforce the isolation invariant, but the trait itself allows `None`
/// for admin/cross-fleet views.
#[derive(Debug, Clone, Default)]
pub struct AnomalyEventFilter {
    pub connection_id: Option<ConnectionId>,
    pub metric_kind: Option<MetricKind>,
    pub severity: Option<Severity>,
    pub resolved: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct CorrelatedGroupFilter {
    pub connection_id: Option<ConnectionId>,
    pub pattern: Option<Pattern>,
    pub resolved: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Persistence boundary for anomaly events, correlated groups, webhook
/// subscriptions, and webhook deliveries. Every read that accepts a
/// `connection_id` filter MUST scope its results to that connection —
/// this is the one place the isolation invariant is enforced for
/// anything that outlives a single request.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_anomaly_event(&self, event: AnomalyEvent) -> Result<()>;
    async fn get_anomaly_events(&self, filter: AnomalyEventFilter) -> Result<Vec<AnomalyEvent>>;
    async fn get_anomaly_event(&self, id: Uuid) -> Result<Option<AnomalyEvent>>;
    async fn resolve_anomaly(&self, id: Uuid) -> Result<bool>;
    async fn clear_resolved_anomalies(&self, connection_id: Option<ConnectionId>) -> Result<u64>;

    async fn save_correlated_group(&self, group: CorrelatedGroup) -> Result<()>;
    async fn get_correlated_groups(
        &self,
        filter: CorrelatedGroupFilter,
    ) -> Result<Vec<CorrelatedGroup>>;
    async fn resolve_correlated_group(&self, correlation_id: Uuid) -> Result<bool>;

    async fn create_webhook(&self, webhook: WebhookSubscription) -> Result<()>;
    async fn get_webhook(&self, id: Uuid) -> Result<Option<WebhookSubscription>>;
    /// Subscribers listening for `event_kind`. When `connection_id` is
    /// `Some`, also includes fleet-wide subscribers (`connection_id ==
    /// None` on the subscription) alongside ones scoped to that
    /// connection — a narrower-scoped webhook never fires for a
    /// connection it wasn't registered against.
    async fn get_webhooks_by_event(
        &self,
        event_kind: &str,
        connection_id: Option<ConnectionId>,
    ) -> Result<Vec<WebhookSubscription>>;
    async fn list_webhooks(&self) -> Result<Vec<WebhookSubscription>>;
    async fn update_webhook(&self, webhook: WebhookSubscription) -> Result<bool>;
    async fn delete_webhook(&self, id: Uuid) -> Result<bool>;

    async fn create_delivery(&self, delivery: WebhookDelivery) -> Result<()>;
    async fn get_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>>;
    async fn get_deliveries_for_webhook(&self, webhook_id: Uuid) -> Result<Vec<WebhookDelivery>>;
    async fn update_delivery(&self, delivery: WebhookDelivery) -> Result<bool>;
    async fn get_retriable_deliveries(&self, as_of: DateTime<Utc>) -> Result<Vec<WebhookDelivery>>;
    async fn get_dead_letters(&self) -> Result<Vec<WebhookDelivery>>;

    async fn prune_old_anomaly_events(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    async fn prune_old_correlated_groups(&self, cutoff: DateTime<Utc>) -> Result<u64>;
    async fn prune_old_deliveries(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Construct the default process-local storage implementation.
pub fn create_storage() -> std::sync::Arc<dyn Storage> {
    std::sync::Arc::new(InMemoryStorage::new())
}
