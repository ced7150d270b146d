use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use fleetwatch_common::error::Error;
use fleetwatch_common::Result;

use crate::capabilities::Capabilities;
use crate::info::InfoSnapshot;
use crate::DatabaseClient;

/// Speaks the Valkey/Redis RESP wire protocol via `redis`'s
/// `ConnectionManager`, which transparently reconnects on
/// connection loss — the same reconnection responsibility the
/// supervisor would otherwise have to hand-roll per poll loop.
pub struct ValkeyClient {
    manager: ConnectionManager,
    host: String,
    port: u16,
}

impl ValkeyClient {
    pub async fn connect(host: &str, port: u16, password: Option<&str>, tls: bool) -> Result<Self> {
        let scheme = if tls { "rediss" } else { "redis" };
        let url = match password {
            Some(pw) => format!("{scheme}://:{pw}@{host}:{port}"),
            None => format!("{scheme}://{host}:{port}"),
        };
        let client = redis::Client::open(url)
            .map_err(|e| Error::Configuration(format!("invalid connection url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Database(format!("failed to connect to {host}:{port}: {e}")))?;

        Ok(Self {
            manager,
            host: host.to_string(),
            port,
        })
    }

    /// The underlying connection manager, for advanced call sites
    /// (CLUSTER NODES, SLOWLOG GET, CLIENT LIST) that sit outside this
    /// core's scope but that a caller may still want to issue directly.
    pub fn raw_connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl DatabaseClient for ValkeyClient {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Database(format!("PING failed for {}:{}: {e}", self.host, self.port)))?;
        Ok(())
    }

    async fn get_info(&self) -> Result<InfoSnapshot> {
        let mut conn = self.manager.clone();
        let raw: String = redis::cmd("INFO")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Database(format!("INFO failed for {}:{}: {e}", self.host, self.port)))?;
        debug!(host = %self.host, port = self.port, "fetched INFO snapshot");
        Ok(InfoSnapshot::parse(&raw))
    }

    async fn get_capabilities(&self) -> Result<Capabilities> {
        let info = self.get_info().await?;
        let mut conn = self.manager.clone();
        let command_docs_available = redis::cmd("COMMAND")
            .arg("DOCS")
            .arg("PING")
            .query_async::<_, redis::Value>(&mut conn)
            .await
            .is_ok();
        if !command_docs_available {
            warn!(host = %self.host, port = self.port, "COMMAND DOCS unavailable, degrading capability probe");
        }
        Ok(Capabilities::from_info(&info, command_docs_available))
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }
}
