//! Connection registry: tracks the fleet of monitored database
//! instances, enforcing a cap on the number of live connections and
//! notifying subscribers (the supervisor, chiefly) when one is
//! removed, so its poll loops can be torn down.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use fleetwatch_common::types::{ConnectionId, ConnectionInfo};

/// An event the registry broadcasts to subscribers.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Added(ConnectionId),
    Removed(ConnectionId),
}

struct Entry {
    info: ConnectionInfo,
    last_active_ms: i64,
}

/// Tracks `connectionId -> {name, host, port, ...}`, capped at
/// `max_connections`. When the cap is reached, adding a new connection
/// evicts the least-recently-active idle one rather than rejecting the
/// request outright — the same "evict rather than reject" posture the
/// teacher's load balancer takes with stale endpoints.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Entry>>,
    default_id: RwLock<Option<ConnectionId>>,
    max_connections: usize,
    events: broadcast::Sender<RegistryEvent>,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(256);
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            default_id: RwLock::new(None),
            max_connections: max_connections.max(1),
            events: tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Register a connection, evicting the least-recently-active entry
    /// first if the registry is already at capacity.
    pub async fn add(&self, info: ConnectionInfo, now_ms: i64) {
        let id = info.id.clone();
        let mut connections = self.connections.write().await;

        if !connections.contains_key(&id) && connections.len() >= self.max_connections {
            if let Some(evict_id) = Self::least_recently_active(&connections) {
                warn!(connection_id = %evict_id, "registry at capacity, evicting least-recently-active connection");
                connections.remove(&evict_id);
                let _ = self.events.send(RegistryEvent::Removed(evict_id));
            }
        }

        let is_first = connections.is_empty();
        connections.insert(
            id.clone(),
            Entry {
                info,
                last_active_ms: now_ms,
            },
        );
        drop(connections);

        if is_first {
            *self.default_id.write().await = Some(id.clone());
        }

        info!(connection_id = %id, "connection registered");
        let _ = self.events.send(RegistryEvent::Added(id));
    }

    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.connections.write().await.remove(id).is_some();
        if removed {
            info!(connection_id = %id, "connection removed");
            let _ = self.events.send(RegistryEvent::Removed(id.to_string()));

            let mut default_id = self.default_id.write().await;
            if default_id.as_deref() == Some(id) {
                *default_id = self.connections.read().await.keys().next().cloned();
            }
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<ConnectionInfo> {
        self.connections.read().await.get(id).map(|e| e.info.clone())
    }

    pub async fn touch(&self, id: &str, now_ms: i64) {
        if let Some(entry) = self.connections.write().await.get_mut(id) {
            entry.last_active_ms = now_ms;
        }
    }

    pub async fn list(&self) -> Vec<ConnectionInfo> {
        self.connections.read().await.values().map(|e| e.info.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn get_default_id(&self) -> Option<ConnectionId> {
        self.default_id.read().await.clone()
    }

    fn least_recently_active(connections: &HashMap<ConnectionId, Entry>) -> Option<ConnectionId> {
        connections
            .iter()
            .min_by_key(|(_, entry)| entry.last_active_ms)
            .map(|(id, _)| id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str) -> ConnectionInfo {
        ConnectionInfo {
            id: id.to_string(),
            name: id.to_string(),
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            tls: false,
        }
    }

    #[tokio::test]
    async fn first_connection_becomes_default() {
        let registry = ConnectionRegistry::new(100);
        registry.add(info("a"), 0).await;
        assert_eq!(registry.get_default_id().await, Some("a".to_string()));
    }

    #[tokio::test]
    async fn eviction_removes_least_recently_active_when_at_capacity() {
        let registry = ConnectionRegistry::new(2);
        registry.add(info("a"), 0).await;
        registry.add(info("b"), 10).await;
        registry.touch("b", 20).await;

        registry.add(info("c"), 30).await;

        assert_eq!(registry.len().await, 2);
        assert!(registry.get("a").await.is_none(), "oldest-touched connection should be evicted");
        assert!(registry.get("b").await.is_some());
        assert!(registry.get("c").await.is_some());
    }

    #[tokio::test]
    async fn removing_default_promotes_another_connection() {
        let registry = ConnectionRegistry::new(10);
        registry.add(info("a"), 0).await;
        registry.add(info("b"), 10).await;
        registry.remove("a").await;
        assert_eq!(registry.get_default_id().await, Some("b".to_string()));
    }

    #[tokio::test]
    async fn removal_broadcasts_event_to_subscribers() {
        let registry = ConnectionRegistry::new(10);
        let mut rx = registry.subscribe();
        registry.add(info("a"), 0).await;
        let _ = rx.recv().await.unwrap();
        registry.remove("a").await;
        match rx.recv().await.unwrap() {
            RegistryEvent::Removed(id) => assert_eq!(id, "a"),
            other => panic!("expected Removed event, got {other:?}"),
        }
    }
}
