//! The FleetWatch process: wires storage, the connection registry,
//! the polling supervisor, the anomaly engine, the correlator, and
//! the webhook dispatcher together, and exposes them over HTTP.

pub mod gateway;
pub mod handlers;
pub mod server;

pub use gateway::Gateway;
pub use server::Server;

use fleetwatch_common::{FleetWatchConfig, Result};
use std::sync::Arc;

/// Build and start every component of a FleetWatch instance.
pub async fn init_gateway(config: FleetWatchConfig) -> Result<Arc<Gateway>> {
    config.validate()?;
    Gateway::start(config).await
}

/// Serve the HTTP surface for an already-started gateway.
pub async fn start_server(gateway: Arc<Gateway>, bind_addr: &str) -> Result<()> {
    Server::new(gateway).run(bind_addr).await
}
