//! Webhook fan-out and delivery (component G, spec.md §4.G): resolves
//! subscribers for a fired event, gates threshold-kind events, signs
//! and POSTs the canonical payload, and persists the outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

use fleetwatch_common::types::{
    ConnectionId, DeliveryStatus, WebhookDelivery, WebhookSubscription,
};
use fleetwatch_common::{metrics as fw_metrics, Clock, EventDispatch};
use fleetwatch_storage::Storage;

use crate::signing;
use crate::threshold_gate::{GateOutcome, ThresholdGate};

/// How a single delivery attempt came out, per spec.md §4.G step 9.
enum Outcome {
    Success,
    FailedNoRetry,
    Retrying,
    FailedExhausted,
}

pub struct WebhookDispatcher {
    storage: Arc<dyn Storage>,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    gate: Arc<ThresholdGate>,
    semaphore: Arc<Semaphore>,
    subscriber_locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl WebhookDispatcher {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, max_in_flight: usize) -> Arc<Self> {
        Arc::new(Self {
            storage,
            http: reqwest::Client::new(),
            clock,
            gate: Arc::new(ThresholdGate::new()),
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
            subscriber_locks: RwLock::new(HashMap::new()),
        })
    }

    async fn lock_for(&self, subscriber_id: Uuid) -> Arc<Mutex<()>> {
        if let Some(lock) = self.subscriber_locks.read().await.get(&subscriber_id) {
            return lock.clone();
        }
        let mut guard = self.subscriber_locks.write().await;
        guard.entry(subscriber_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Resolve subscribers, gate threshold-kind events, and dispatch
    /// the surviving set concurrently. Each subscriber's own network
    /// call is a suspension point; subscribers never block each other.
    async fn dispatch_to_subscribers(
        &self,
        event_kind: &str,
        payload: serde_json::Value,
        connection_id: ConnectionId,
        source_host: &str,
        source_port: u16,
    ) {
        let subscribers = match self
            .storage
            .get_webhooks_by_event(event_kind, Some(connection_id.clone()))
            .await
        {
            Ok(subs) => subs,
            Err(err) => {
                warn!(error = %err, event_kind, "failed to resolve webhook subscribers");
                return;
            }
        };
        if subscribers.is_empty() {
            return;
        }

        let now = self.clock.now();
        let mut surviving = Vec::new();
        for sub in subscribers {
            if let Some(&threshold) = sub.thresholds.get(event_kind) {
                let value = payload.get("value").and_then(|v| v.as_f64()).unwrap_or(f64::INFINITY);
                match self.gate.activate(sub.id, event_kind, value, threshold, now).await {
                    GateOutcome::Fire => surviving.push(sub),
                    GateOutcome::Suppress => {
                        debug!(subscriber = %sub.id, event_kind, "threshold gate suppressed delivery");
                    }
                }
            } else {
                surviving.push(sub);
            }
        }

        let deliveries = surviving
            .into_iter()
            .map(|sub| self.deliver_to_subscriber(sub, event_kind, payload.clone(), source_host, source_port));
        futures::future::join_all(deliveries).await;
    }

    async fn deliver_to_subscriber(
        &self,
        subscriber: WebhookSubscription,
        event_kind: &str,
        data: serde_json::Value,
        source_host: &str,
        source_port: u16,
    ) {
        let envelope = serde_json::json!({
            "id": Uuid::new_v4(),
            "event": event_kind,
            "timestamp": self.clock.now(),
            "instance": { "host": source_host, "port": source_port },
            "data": data,
        });

        let delivery = WebhookDelivery {
            id: Uuid::new_v4(),
            webhook_id: subscriber.id,
            event_kind: event_kind.to_string(),
            payload: envelope,
            status: DeliveryStatus::Pending,
            attempts: 0,
            status_code: None,
            response_body: None,
            next_retry_at: None,
            created_at: self.clock.now(),
            completed_at: None,
            duration_ms: None,
        };

        if let Err(err) = self.storage.create_delivery(delivery.clone()).await {
            warn!(error = %err, "failed to persist webhook delivery record");
            return;
        }

        self.attempt(subscriber, delivery).await;
    }

    /// Execute one attempt against `delivery`, persist the result, and
    /// leave it scheduled for retry if the outcome calls for it. Shared
    /// by the first attempt (called from `dispatch`) and the
    /// background redrive scan (called from `retry_scan`).
    pub async fn attempt(&self, subscriber: WebhookSubscription, mut delivery: WebhookDelivery) {
        let _permit = self.semaphore.acquire().await;
        let lock = self.lock_for(subscriber.id).await;
        let _guard = lock.lock().await;

        delivery.attempts += 1;
        let body = match serde_json::to_vec(&delivery.payload) {
            Ok(b) => b,
            Err(err) => {
                warn!(error = %err, "failed to serialize webhook payload");
                return;
            }
        };
        let signature = signing::sign(&subscriber.secret, &body);

        let mut request = self
            .http
            .post(&subscriber.url)
            .timeout(Duration::from_millis(subscriber.delivery_config.timeout_ms))
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", signature)
            .header("X-Webhook-Timestamp", self.clock.now_ms().to_string());
        for (name, value) in &subscriber.headers {
            request = request.header(name, value);
        }

        let start = self.clock.now_ms();
        let send_result = request.body(body).send().await;
        let duration_ms = (self.clock.now_ms() - start).max(0) as u64;

        let outcome = match send_result {
            Ok(response) => {
                let status = response.status();
                delivery.status_code = Some(status.as_u16());
                let max_body = subscriber.delivery_config.max_response_body_bytes;
                let text = response.text().await.unwrap_or_default();
                delivery.response_body = Some(text.chars().take(max_body).collect());

                if status.is_success() {
                    Outcome::Success
                } else if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
                    self.retry_or_exhaust(&subscriber, &delivery)
                } else {
                    Outcome::FailedNoRetry
                }
            }
            Err(err) => {
                warn!(subscriber = %subscriber.id, error = %err, "webhook delivery attempt failed");
                delivery.response_body = Some(err.to_string());
                self.retry_or_exhaust(&subscriber, &delivery)
            }
        };

        delivery.duration_ms = Some(duration_ms);
        self.finalize(&subscriber, &mut delivery, outcome).await;
    }

    fn retry_or_exhaust(&self, subscriber: &WebhookSubscription, delivery: &WebhookDelivery) -> Outcome {
        if delivery.attempts < subscriber.retry_policy.max_retries {
            Outcome::Retrying
        } else {
            Outcome::FailedExhausted
        }
    }

    async fn finalize(&self, subscriber: &WebhookSubscription, delivery: &mut WebhookDelivery, outcome: Outcome) {
        let outcome_label = match outcome {
            Outcome::Success => {
                delivery.status = DeliveryStatus::Success;
                delivery.completed_at = Some(self.clock.now());
                delivery.next_retry_at = None;
                "success"
            }
            Outcome::FailedNoRetry | Outcome::FailedExhausted => {
                delivery.status = DeliveryStatus::Failed;
                delivery.completed_at = Some(self.clock.now());
                delivery.next_retry_at = None;
                if delivery.attempts >= subscriber.retry_policy.max_retries {
                    metrics::counter!(fw_metrics::WEBHOOK_DELIVERIES_DEAD_LETTERED).increment(1);
                }
                "failed"
            }
            Outcome::Retrying => {
                delivery.status = DeliveryStatus::Retrying;
                let delay = fleetwatch_common::retry::backoff_delay(&subscriber.retry_policy, delivery.attempts - 1);
                delivery.next_retry_at = Some(self.clock.now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
                "retrying"
            }
        };

        metrics::counter!(
            fw_metrics::WEBHOOK_DELIVERIES_TOTAL,
            "outcome" => outcome_label,
            "subscriber" => subscriber.id.to_string(),
        )
        .increment(1);
        if let Some(duration_ms) = delivery.duration_ms {
            metrics::histogram!(fw_metrics::WEBHOOK_DELIVERY_DURATION_MS).record(duration_ms as f64);
        }

        if let Err(err) = self.storage.update_delivery(delivery.clone()).await {
            warn!(error = %err, "failed to persist webhook delivery outcome");
        }
    }

    /// Requeue a dead-lettered delivery: status -> retrying, attempts
    /// reset to zero, due immediately (spec.md §4.G step 12).
    pub async fn requeue(&self, delivery_id: Uuid) -> fleetwatch_common::Result<bool> {
        let Some(mut delivery) = self.storage.get_delivery(delivery_id).await? else {
            return Ok(false);
        };
        delivery.status = DeliveryStatus::Retrying;
        delivery.attempts = 0;
        delivery.next_retry_at = Some(self.clock.now());
        delivery.completed_at = None;
        self.storage.update_delivery(delivery.clone()).await
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn gate(&self) -> Arc<ThresholdGate> {
        self.gate.clone()
    }
}

#[async_trait]
impl EventDispatch for WebhookDispatcher {
    async fn dispatch(
        &self,
        event_kind: &str,
        payload: serde_json::Value,
        connection_id: ConnectionId,
        source_host: &str,
        source_port: u16,
    ) {
        self.dispatch_to_subscribers(event_kind, payload, connection_id, source_host, source_port)
            .await;
    }
}
