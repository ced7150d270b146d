//! Adapts `AnomalyEngine` to `fleetwatch_supervisor::PollTask`, so the
//! polling supervisor can drive it once per tick per connection
//! without knowing anything about buffers or detectors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use fleetwatch_common::types::ConnectionId;
use fleetwatch_dbclient::DatabaseClient;
use fleetwatch_supervisor::PollTask;

use crate::engine::AnomalyEngine;

/// One poll task per connection: fetches that connection's `INFO`
/// snapshot and runs it through the engine. The supervisor guarantees
/// overrun safety (§4.D); this task only has to fetch and process.
pub struct AnomalyPollTask {
    engine: Arc<AnomalyEngine>,
    client: Arc<dyn DatabaseClient>,
}

impl AnomalyPollTask {
    pub fn new(engine: Arc<AnomalyEngine>, client: Arc<dyn DatabaseClient>) -> Arc<Self> {
        Arc::new(Self { engine, client })
    }
}

#[async_trait]
impl PollTask for AnomalyPollTask {
    async fn poll(&self, connection_id: &ConnectionId) {
        if let Err(err) = self.client.ping().await {
            warn!(connection_id = %connection_id, error = %err, "ping failed before anomaly poll, attempting info fetch anyway");
        }
        self.engine.tick(connection_id, self.client.as_ref()).await;
    }

    async fn on_connection_removed(&self, connection_id: &ConnectionId) {
        self.engine.on_connection_removed(connection_id).await;
    }
}
