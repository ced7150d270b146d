use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use fleetwatch_common::error::Error;
use fleetwatch_common::Result;

use crate::capabilities::Capabilities;
use crate::info::InfoSnapshot;
use crate::DatabaseClient;

/// Test double backed by a canned `INFO` blob, used by the detector
/// and engine test suites instead of a live Valkey/Redis instance.
pub struct MockDatabaseClient {
    info: String,
    host: String,
    port: u16,
    fail_ping: AtomicBool,
}

impl MockDatabaseClient {
    pub fn new(host: &str, port: u16, info: &str) -> Self {
        Self {
            info: info.to_string(),
            host: host.to_string(),
            port,
            fail_ping: AtomicBool::new(false),
        }
    }

    pub fn set_fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn ping(&self) -> Result<()> {
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(Error::Network(format!("mock ping failure for {}:{}", self.host, self.port)));
        }
        Ok(())
    }

    async fn get_info(&self) -> Result<InfoSnapshot> {
        Ok(InfoSnapshot::parse(&self.info))
    }

    async fn get_capabilities(&self) -> Result<Capabilities> {
        let info = self.get_info().await?;
        Ok(Capabilities::from_info(&info, true))
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }
}
