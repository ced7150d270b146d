//! The seam between the components that produce notable events
//! (anomaly engine, correlator) and the component that ships them to
//! subscribers (the webhook dispatcher), expressed as a capability
//! trait rather than a direct dependency so neither crate has to know
//! about the other's internals — only `fleetwatch-common` sits between
//! them.

use async_trait::async_trait;

use crate::types::ConnectionId;

/// Something that can receive a named event and fan it out. The
/// webhook dispatcher is the only implementer in this workspace; tests
/// elsewhere use a recording stub.
#[async_trait]
pub trait EventDispatch: Send + Sync {
    async fn dispatch(
        &self,
        event_kind: &str,
        payload: serde_json::Value,
        connection_id: ConnectionId,
        source_host: &str,
        source_port: u16,
    );
}

/// A no-op sink, for components that run without a configured
/// dispatcher (e.g. a correlator-only test harness).
pub struct NullDispatch;

#[async_trait]
impl EventDispatch for NullDispatch {
    async fn dispatch(
        &self,
        _event_kind: &str,
        _payload: serde_json::Value,
        _connection_id: ConnectionId,
        _source_host: &str,
        _source_port: u16,
    ) {
    }
}
