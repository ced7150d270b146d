use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use fleetwatch_common::types::{
    AnomalyEvent, ConnectionId, CorrelatedGroup, DeliveryStatus, WebhookDelivery,
    WebhookSubscription,
};
use fleetwatch_common::Result;

use crate::{AnomalyEventFilter, CorrelatedGroupFilter, Storage};

/// Process-local `Storage` implementation. Not a durability layer —
/// state is lost on restart, by design (the spec places long-term
/// warehousing out of scope for this core). Every collection is keyed
/// by the record's own id, with `connectionId` carried on the record
/// itself so filtering never requires a second index.
#[derive(Default)]
pub struct InMemoryStorage {
    anomaly_events: RwLock<HashMap<Uuid, AnomalyEvent>>,
    correlated_groups: RwLock<HashMap<Uuid, CorrelatedGroup>>,
    webhooks: RwLock<HashMap<Uuid, WebhookSubscription>>,
    deliveries: RwLock<HashMap<Uuid, WebhookDelivery>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_connection(filter: &Option<ConnectionId>, candidate: &ConnectionId) -> bool {
    filter.as_ref().map(|c| c == candidate).unwrap_or(true)
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_anomaly_event(&self, event: AnomalyEvent) -> Result<()> {
        self.anomaly_events.write().await.insert(event.id, event);
        Ok(())
    }

    async fn get_anomaly_events(&self, filter: AnomalyEventFilter) -> Result<Vec<AnomalyEvent>> {
        let events = self.anomaly_events.read().await;
        let mut matched: Vec<AnomalyEvent> = events
            .values()
            .filter(|e| matches_connection(&filter.connection_id, &e.connection_id))
            .filter(|e| filter.metric_kind.map(|m| m == e.metric_kind).unwrap_or(true))
            .filter(|e| filter.severity.map(|s| s == e.severity).unwrap_or(true))
            .filter(|e| filter.resolved.map(|r| r == e.resolved).unwrap_or(true))
            .filter(|e| filter.since.map(|since| e.timestamp >= since).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn get_anomaly_event(&self, id: Uuid) -> Result<Option<AnomalyEvent>> {
        Ok(self.anomaly_events.read().await.get(&id).cloned())
    }

    async fn resolve_anomaly(&self, id: Uuid) -> Result<bool> {
        let mut events = self.anomaly_events.write().await;
        if let Some(event) = events.get_mut(&id) {
            event.resolved = true;
            event.resolved_at = Some(Utc::now());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn clear_resolved_anomalies(&self, connection_id: Option<ConnectionId>) -> Result<u64> {
        let mut events = self.anomaly_events.write().await;
        let before = events.len();
        events.retain(|_, e| {
            !(e.resolved && matches_connection(&connection_id, &e.connection_id))
        });
        Ok((before - events.len()) as u64)
    }

    async fn save_correlated_group(&self, group: CorrelatedGroup) -> Result<()> {
        self.correlated_groups
            .write()
            .await
            .insert(group.correlation_id, group);
        Ok(())
    }

    async fn get_correlated_groups(
        &self,
        filter: CorrelatedGroupFilter,
    ) -> Result<Vec<CorrelatedGroup>> {
        let groups = self.correlated_groups.read().await;
        let mut matched: Vec<CorrelatedGroup> = groups
            .values()
            .filter(|g| matches_connection(&filter.connection_id, &g.connection_id))
            .filter(|g| filter.pattern.map(|p| p == g.pattern).unwrap_or(true))
            .filter(|g| filter.resolved.map(|r| r == g.resolved).unwrap_or(true))
            .filter(|g| filter.since.map(|since| g.timestamp >= since).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn resolve_correlated_group(&self, correlation_id: Uuid) -> Result<bool> {
        let mut groups = self.correlated_groups.write().await;
        if let Some(group) = groups.get_mut(&correlation_id) {
            group.resolved = true;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn create_webhook(&self, webhook: WebhookSubscription) -> Result<()> {
        self.webhooks.write().await.insert(webhook.id, webhook);
        Ok(())
    }

    async fn get_webhook(&self, id: Uuid) -> Result<Option<WebhookSubscription>> {
        Ok(self.webhooks.read().await.get(&id).cloned())
    }

    async fn get_webhooks_by_event(
        &self,
        event_kind: &str,
        connection_id: Option<ConnectionId>,
    ) -> Result<Vec<WebhookSubscription>> {
        Ok(self
            .webhooks
            .read()
            .await
            .values()
            .filter(|w| w.enabled && w.events.iter().any(|e| e == event_kind))
            .filter(|w| match (&w.connection_id, &connection_id) {
                (None, _) => true,
                (Some(scoped), Some(requested)) => scoped == requested,
                (Some(_), None) => false,
            })
            .cloned()
            .collect())
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookSubscription>> {
        Ok(self.webhooks.read().await.values().cloned().collect())
    }

    async fn update_webhook(&self, webhook: WebhookSubscription) -> Result<bool> {
        let mut webhooks = self.webhooks.write().await;
        if webhooks.contains_key(&webhook.id) {
            webhooks.insert(webhook.id, webhook);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn delete_webhook(&self, id: Uuid) -> Result<bool> {
        Ok(self.webhooks.write().await.remove(&id).is_some())
    }

    async fn create_delivery(&self, delivery: WebhookDelivery) -> Result<()> {
        self.deliveries.write().await.insert(delivery.id, delivery);
        Ok(())
    }

    async fn get_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>> {
        Ok(self.deliveries.read().await.get(&id).cloned())
    }

    async fn get_deliveries_for_webhook(&self, webhook_id: Uuid) -> Result<Vec<WebhookDelivery>> {
        let mut matched: Vec<WebhookDelivery> = self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| d.webhook_id == webhook_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn update_delivery(&self, delivery: WebhookDelivery) -> Result<bool> {
        let mut deliveries = self.deliveries.write().await;
        if deliveries.contains_key(&delivery.id) {
            deliveries.insert(delivery.id, delivery);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get_retriable_deliveries(&self, as_of: DateTime<Utc>) -> Result<Vec<WebhookDelivery>> {
        Ok(self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| d.status == DeliveryStatus::Retrying && d.next_retry_at.map(|at| at <= as_of).unwrap_or(false))
            .cloned()
            .collect())
    }

    /// A delivery is a dead letter once it has settled as `failed` with
    /// no retry budget left, per `WebhookDelivery::is_dead_letter`
    /// (spec.md §4.G step 12) — there is no separate stored
    /// `DeadLetter` status to filter on.
    async fn get_dead_letters(&self) -> Result<Vec<WebhookDelivery>> {
        let webhooks = self.webhooks.read().await;
        Ok(self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| {
                webhooks
                    .get(&d.webhook_id)
                    .map(|w| d.is_dead_letter(w.retry_policy.max_retries))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn prune_old_anomaly_events(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut events = self.anomaly_events.write().await;
        let before = events.len();
        events.retain(|_, e| e.timestamp >= cutoff);
        Ok((before - events.len()) as u64)
    }

    async fn prune_old_correlated_groups(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut groups = self.correlated_groups.write().await;
        let before = groups.len();
        groups.retain(|_, g| g.timestamp >= cutoff);
        Ok((before - groups.len()) as u64)
    }

    async fn prune_old_deliveries(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut deliveries = self.deliveries.write().await;
        let before = deliveries.len();
        deliveries.retain(|_, d| d.created_at >= cutoff);
        Ok((before - deliveries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_common::types::{AnomalyKind, MetricKind, Severity};

    fn sample_event(connection_id: &str) -> AnomalyEvent {
        AnomalyEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            connection_id: connection_id.to_string(),
            metric_kind: MetricKind::OpsPerSec,
            kind: AnomalyKind::Spike,
            severity: Severity::Warning,
            value: 100.0,
            baseline: 10.0,
            stddev: 2.0,
            z_score: 5.0,
            threshold: 3.0,
            message: "ops/sec spike".to_string(),
            correlation_id: None,
            related_metrics: vec![],
            resolved: false,
            resolved_at: None,
            source_host: "localhost".to_string(),
            source_port: 6379,
        }
    }

    #[tokio::test]
    async fn anomaly_events_are_isolated_by_connection() {
        let storage = InMemoryStorage::new();
        storage.save_anomaly_event(sample_event("conn-a")).await.unwrap();
        storage.save_anomaly_event(sample_event("conn-b")).await.unwrap();

        let filter = AnomalyEventFilter {
            connection_id: Some("conn-a".to_string()),
            ..Default::default()
        };
        let events = storage.get_anomaly_events(filter).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].connection_id, "conn-a");
    }

    #[tokio::test]
    async fn resolve_anomaly_is_idempotent() {
        let storage = InMemoryStorage::new();
        let event = sample_event("conn-a");
        let id = event.id;
        storage.save_anomaly_event(event).await.unwrap();

        assert!(storage.resolve_anomaly(id).await.unwrap());
        assert!(storage.resolve_anomaly(id).await.unwrap());

        let fetched = storage.get_anomaly_event(id).await.unwrap().unwrap();
        assert!(fetched.resolved);
    }

    #[tokio::test]
    async fn resolve_unknown_anomaly_returns_false() {
        let storage = InMemoryStorage::new();
        assert!(!storage.resolve_anomaly(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn prune_removes_only_events_before_cutoff() {
        let storage = InMemoryStorage::new();
        let mut old = sample_event("conn-a");
        old.timestamp = Utc::now() - chrono::Duration::hours(100);
        storage.save_anomaly_event(old).await.unwrap();
        storage.save_anomaly_event(sample_event("conn-a")).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(72);
        let pruned = storage.prune_old_anomaly_events(cutoff).await.unwrap();
        assert_eq!(pruned, 1);

        let remaining = storage
            .get_anomaly_events(AnomalyEventFilter::default())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    fn sample_webhook(connection_id: Option<&str>) -> WebhookSubscription {
        WebhookSubscription {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            url: "https://example.com/hook".to_string(),
            enabled: true,
            secret: "topsecret".to_string(),
            events: vec!["anomaly.detected".to_string()],
            headers: Default::default(),
            retry_policy: Default::default(),
            delivery_config: Default::default(),
            alert_config: Default::default(),
            thresholds: Default::default(),
            connection_id: connection_id.map(|s| s.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn scoped_webhook_only_matches_its_own_connection() {
        let storage = InMemoryStorage::new();
        storage.create_webhook(sample_webhook(Some("conn-a"))).await.unwrap();
        storage.create_webhook(sample_webhook(None)).await.unwrap();

        let for_a = storage
            .get_webhooks_by_event("anomaly.detected", Some("conn-a".to_string()))
            .await
            .unwrap();
        assert_eq!(for_a.len(), 2, "connection-scoped and fleet-wide webhooks should both fire for conn-a");

        let for_b = storage
            .get_webhooks_by_event("anomaly.detected", Some("conn-b".to_string()))
            .await
            .unwrap();
        assert_eq!(for_b.len(), 1, "conn-a's webhook must not fire for conn-b");
        assert!(for_b[0].connection_id.is_none());
    }
}
