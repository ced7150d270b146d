//! HTTP handlers for the FleetWatch HTTP surface, spec.md §6.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use fleetwatch_common::types::{MetricKind, Severity, WebhookSubscription};
use fleetwatch_storage::{AnomalyEventFilter, CorrelatedGroupFilter};

use crate::gateway::Gateway;

pub type AppState = Arc<Gateway>;

const CONNECTION_ID_HEADER: &str = "x-connection-id";

fn connection_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONNECTION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    let request_id = Uuid::new_v4();
    (
        status,
        Json(json!({
            "error": { "code": status.as_u16(), "message": message.into(), "requestId": request_id }
        })),
    )
        .into_response()
}

pub fn create_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/anomaly/events", get(list_events))
        .route("/anomaly/groups", get(list_groups))
        .route("/anomaly/summary", get(summary))
        .route("/anomaly/buffers", get(buffers))
        .route("/anomaly/events/:id/resolve", post(resolve_event))
        .route("/anomaly/groups/:correlation_id/resolve", post(resolve_group))
        .route("/anomaly/events/clear-resolved", post(clear_resolved))
        .route("/webhooks", get(list_webhooks).post(create_webhook))
        .route(
            "/webhooks/:id",
            get(get_webhook).patch(update_webhook).delete(delete_webhook),
        )
        .route("/webhooks/:id/test", post(test_webhook))
        .route("/webhooks/:id/deliveries", get(webhook_deliveries))
        .route("/webhooks/stats/retry-queue", get(retry_queue_stats))
        .with_state(gateway)
}

async fn health(State(gateway): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": gateway.registry.len().await,
    }))
}

async fn metrics_endpoint(State(gateway): State<AppState>) -> impl IntoResponse {
    gateway.metrics_handle.render()
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
    #[serde(rename = "metricType")]
    metric_type: Option<String>,
    severity: Option<String>,
    resolved: Option<bool>,
}

async fn list_events(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<EventsQuery>,
) -> impl IntoResponse {
    let connection_id = gateway.resolve_connection(connection_id_from(&headers).as_deref()).await;
    let metric_kind = q
        .metric_type
        .and_then(|m| MetricKind::ALL.into_iter().find(|k| k.as_str() == m));
    let severity = q.severity.and_then(|s| match s.as_str() {
        "info" => Some(Severity::Info),
        "warning" => Some(Severity::Warning),
        "critical" => Some(Severity::Critical),
        _ => None,
    });

    let filter = AnomalyEventFilter {
        connection_id,
        metric_kind,
        severity,
        resolved: q.resolved,
        since: None,
        limit: q.limit,
    };
    match gateway.storage.get_anomaly_events(filter).await {
        Ok(events) => Json(events).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct GroupsQuery {
    limit: Option<usize>,
    pattern: Option<String>,
}

fn parse_pattern(s: &str) -> Option<fleetwatch_common::types::Pattern> {
    use fleetwatch_common::types::Pattern::*;
    Some(match s {
        "cascading-failure" => CascadingFailure,
        "memory-pressure" => MemoryPressure,
        "traffic-surge" => TrafficSurge,
        "auth-storm" => AuthStorm,
        "replication-stress" => ReplicationStress,
        "slow-query-burst" => SlowQueryBurst,
        "eviction-cascade" => EvictionCascade,
        "fragmentation-drift" => FragmentationDrift,
        "unknown" => Unknown,
        _ => return None,
    })
}

async fn list_groups(
    State(gateway): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<GroupsQuery>,
) -> impl IntoResponse {
    let connection_id = gateway.resolve_connection(connection_id_from(&headers).as_deref()).await;
    let filter = CorrelatedGroupFilter {
        connection_id,
        pattern: q.pattern.as_deref().and_then(parse_pattern),
        resolved: None,
        since: None,
        limit: q.limit,
    };
    match gateway.storage.get_correlated_groups(filter).await {
        Ok(groups) => Json(groups).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn summary(State(gateway): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let connection_id = gateway.resolve_connection(connection_id_from(&headers).as_deref()).await;
    let events = match gateway
        .storage
        .get_anomaly_events(AnomalyEventFilter {
            connection_id: connection_id.clone(),
            ..Default::default()
        })
        .await
    {
        Ok(events) => events,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    };
    let groups = match gateway
        .storage
        .get_correlated_groups(CorrelatedGroupFilter {
            connection_id,
            ..Default::default()
        })
        .await
    {
        Ok(groups) => groups,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    };

    let mut by_severity = std::collections::HashMap::new();
    let mut by_metric = std::collections::HashMap::new();
    let mut active = 0u64;
    let mut resolved = 0u64;
    for e in &events {
        *by_severity.entry(e.severity.to_string()).or_insert(0u64) += 1;
        *by_metric.entry(e.metric_kind.to_string()).or_insert(0u64) += 1;
        if e.resolved {
            resolved += 1;
        } else {
            active += 1;
        }
    }
    let mut by_pattern = std::collections::HashMap::new();
    for g in &groups {
        *by_pattern.entry(g.pattern.to_string()).or_insert(0u64) += 1;
    }

    Json(json!({
        "totalEvents": events.len(),
        "totalGroups": groups.len(),
        "bySeverity": by_severity,
        "byMetric": by_metric,
        "byPattern": by_pattern,
        "activeEvents": active,
        "resolvedEvents": resolved,
    }))
    .into_response()
}

async fn buffers(State(gateway): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let connection_id = gateway.resolve_connection(connection_id_from(&headers).as_deref()).await;
    let snapshot = gateway.engine.buffer_snapshot().await;
    let min_samples = gateway.config.buffer.min_samples;
    let filtered: Vec<_> = snapshot
        .into_iter()
        .filter(|(conn, _, _)| connection_id.as_ref().map(|c| c == conn).unwrap_or(true))
        .map(|(conn, kind, stats)| {
            json!({
                "connectionId": conn,
                "metricKind": kind,
                "count": stats.count,
                "mean": stats.mean,
                "stddev": stats.stddev,
                "isWarm": stats.count >= min_samples,
            })
        })
        .collect();
    Json(filtered).into_response()
}

async fn resolve_event(State(gateway): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match gateway.storage.resolve_anomaly(id).await {
        Ok(success) => Json(json!({ "success": success })).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn resolve_group(State(gateway): State<AppState>, Path(correlation_id): Path<Uuid>) -> impl IntoResponse {
    match gateway.storage.resolve_correlated_group(correlation_id).await {
        Ok(success) => Json(json!({ "success": success })).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn clear_resolved(State(gateway): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let connection_id = gateway.resolve_connection(connection_id_from(&headers).as_deref()).await;
    match gateway.storage.clear_resolved_anomalies(connection_id).await {
        Ok(cleared) => Json(json!({ "cleared": cleared })).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn redact(sub: WebhookSubscription) -> Value {
    json!({
        "id": sub.id,
        "name": sub.name,
        "url": sub.url,
        "enabled": sub.enabled,
        "secret": sub.masked_secret(),
        "events": sub.events,
        "headers": sub.headers,
        "retryPolicy": sub.retry_policy,
        "deliveryConfig": sub.delivery_config,
        "alertConfig": sub.alert_config,
        "thresholds": sub.thresholds,
        "connectionId": sub.connection_id,
        "createdAt": sub.created_at,
        "updatedAt": sub.updated_at,
    })
}

async fn list_webhooks(State(gateway): State<AppState>) -> impl IntoResponse {
    match gateway.dispatcher.storage().list_webhooks().await {
        Ok(subs) => Json(subs.into_iter().map(redact).collect::<Vec<_>>()).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct CreateWebhookRequest {
    name: String,
    url: String,
    secret: String,
    events: Vec<String>,
    #[serde(default)]
    headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    thresholds: std::collections::HashMap<String, f64>,
}

async fn create_webhook(State(gateway): State<AppState>, Json(req): Json<CreateWebhookRequest>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let sub = WebhookSubscription {
        id: Uuid::new_v4(),
        name: req.name,
        url: req.url,
        enabled: true,
        secret: req.secret,
        events: req.events,
        headers: req.headers,
        retry_policy: fleetwatch_common::types::RetryPolicy::default(),
        delivery_config: fleetwatch_common::types::DeliveryConfig::default(),
        alert_config: fleetwatch_common::types::AlertConfig::default(),
        thresholds: req.thresholds,
        connection_id: req.connection_id,
        created_at: now,
        updated_at: now,
    };
    match gateway.dispatcher.storage().create_webhook(sub.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(redact(sub))).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn get_webhook(State(gateway): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match gateway.dispatcher.storage().get_webhook(id).await {
        Ok(Some(sub)) => Json(redact(sub)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "webhook not found"),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn update_webhook(
    State(gateway): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<Value>,
) -> impl IntoResponse {
    let storage = gateway.dispatcher.storage();
    let Some(mut sub) = (match storage.get_webhook(id).await {
        Ok(sub) => sub,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }) else {
        return error_response(StatusCode::NOT_FOUND, "webhook not found");
    };

    if let Some(enabled) = patch.get("enabled").and_then(|v| v.as_bool()) {
        sub.enabled = enabled;
    }
    if let Some(url) = patch.get("url").and_then(|v| v.as_str()) {
        sub.url = url.to_string();
    }
    if let Some(events) = patch.get("events").and_then(|v| v.as_array()) {
        sub.events = events.iter().filter_map(|e| e.as_str().map(String::from)).collect();
    }
    sub.updated_at = chrono::Utc::now();

    match storage.update_webhook(sub.clone()).await {
        Ok(true) => Json(redact(sub)).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "webhook not found"),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn delete_webhook(State(gateway): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match gateway.dispatcher.storage().delete_webhook(id).await {
        Ok(deleted) => Json(json!({ "success": deleted })).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn test_webhook(State(gateway): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    let storage = gateway.dispatcher.storage();
    let Some(sub) = (match storage.get_webhook(id).await {
        Ok(sub) => sub,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }) else {
        return error_response(StatusCode::NOT_FOUND, "webhook not found");
    };

    let delivery = fleetwatch_common::types::WebhookDelivery {
        id: Uuid::new_v4(),
        webhook_id: sub.id,
        event_kind: "test".to_string(),
        payload: json!({ "id": Uuid::new_v4(), "event": "test", "data": { "message": "fleetwatch test delivery" } }),
        status: fleetwatch_common::types::DeliveryStatus::Pending,
        attempts: 0,
        status_code: None,
        response_body: None,
        next_retry_at: None,
        created_at: chrono::Utc::now(),
        completed_at: None,
        duration_ms: None,
    };
    if let Err(err) = storage.create_delivery(delivery.clone()).await {
        warn!(error = %err, "failed to persist test delivery");
    }

    gateway.dispatcher.attempt(sub, delivery.clone()).await;

    match storage.get_delivery(delivery.id).await {
        Ok(Some(d)) => Json(json!({
            "success": d.status == fleetwatch_common::types::DeliveryStatus::Success,
            "statusCode": d.status_code,
            "durationMs": d.duration_ms,
        }))
        .into_response(),
        Ok(None) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "test delivery vanished"),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct DeliveriesQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn webhook_deliveries(
    State(gateway): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<DeliveriesQuery>,
) -> impl IntoResponse {
    match gateway.dispatcher.storage().get_deliveries_for_webhook(id).await {
        Ok(mut deliveries) => {
            deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let offset = q.offset.unwrap_or(0);
            let deliveries: Vec<_> = deliveries.into_iter().skip(offset).take(q.limit.unwrap_or(50)).collect();
            Json(deliveries).into_response()
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn retry_queue_stats(State(gateway): State<AppState>) -> impl IntoResponse {
    let storage = gateway.dispatcher.storage();
    let retriable = storage.get_retriable_deliveries(chrono::DateTime::<chrono::Utc>::MAX_UTC).await;
    let dead_letters = storage.get_dead_letters().await;
    match (retriable, dead_letters) {
        (Ok(retriable), Ok(dead_letters)) => Json(json!({
            "retrying": retriable.len(),
            "deadLettered": dead_letters.len(),
        }))
        .into_response(),
        (Err(err), _) | (_, Err(err)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}
