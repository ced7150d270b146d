//! Database client port: the capability the rest of FleetWatch reaches
//! the monitored instance through, and the concrete Valkey/Redis
//! implementation behind it.

pub mod capabilities;
pub mod info;
mod valkey_client;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

use async_trait::async_trait;

use fleetwatch_common::Result;

pub use capabilities::Capabilities;
pub use info::InfoSnapshot;
pub use valkey_client::ValkeyClient;

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockDatabaseClient;

/// Capability for reaching a single monitored database instance. The
/// engine and supervisor depend only on this trait, never on the wire
/// protocol directly.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn get_info(&self) -> Result<InfoSnapshot>;
    async fn get_capabilities(&self) -> Result<Capabilities>;
    fn host(&self) -> &str;
    fn port(&self) -> u16;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock::MockDatabaseClient;

    #[tokio::test]
    async fn mock_client_reports_capabilities_from_canned_info() {
        let client = MockDatabaseClient::new(
            "localhost",
            6379,
            "# Server\r\nredis_version:7.2.0\r\n",
        );
        let caps = client.get_capabilities().await.unwrap();
        assert_eq!(caps.server_name, "redis");
        assert!(caps.supports_acl);
    }

    #[tokio::test]
    async fn mock_client_ping_can_be_forced_to_fail() {
        let client = MockDatabaseClient::new("localhost", 6379, "");
        assert!(client.ping().await.is_ok());
        client.set_fail_ping(true);
        assert!(client.ping().await.is_err());
    }
}
