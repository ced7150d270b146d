//! Configuration loading for FleetWatch.
//!
//! Mirrors the teacher's nested-config-with-`Default`-impl shape: one
//! top-level struct per concern, assembled via the `config` crate from a
//! TOML file with environment overrides (`FLEETWATCH__SECTION__FIELD`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{ConnectionId, Direction};

/// Top-level configuration for the FleetWatch process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetWatchConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub detectors: HashMap<String, DetectorOverride>,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub webhook: WebhookDispatchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for FleetWatchConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            connections: Vec::new(),
            buffer: BufferConfig::default(),
            detectors: HashMap::new(),
            supervisor: SupervisorConfig::default(),
            correlator: CorrelatorConfig::default(),
            webhook: WebhookDispatchConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FleetWatchConfig {
    /// Load configuration from an optional TOML file plus
    /// `FLEETWATCH__`-prefixed environment overrides, matching the
    /// teacher's layered `config::Config` builder.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&FleetWatchConfig::default())
                .map_err(|e| Error::Configuration(e.to_string()))?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FLEETWATCH")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        let parsed: FleetWatchConfig = cfg
            .try_deserialize()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        parsed.validate()?;
        Ok(parsed)
    }

    /// Fatal startup validation, per §7.3: missing connections, bad
    /// intervals, or a webhook with no secret all fail fast before bind.
    pub fn validate(&self) -> Result<()> {
        if self.connections.is_empty() {
            return Err(Error::Configuration(
                "at least one connection must be configured".into(),
            ));
        }
        for conn in &self.connections {
            if conn.id.trim().is_empty() {
                return Err(Error::Configuration("connection id must not be empty".into()));
            }
            if conn.port == 0 {
                return Err(Error::Configuration(format!(
                    "connection '{}' has an invalid port",
                    conn.id
                )));
            }
        }
        if self.supervisor.default_interval_ms == 0 {
            return Err(Error::Configuration(
                "supervisor.default_interval_ms must be greater than zero".into(),
            ));
        }
        if self.buffer.capacity == 0 || self.buffer.min_samples == 0 {
            return Err(Error::Configuration(
                "buffer.capacity and buffer.min_samples must be greater than zero".into(),
            ));
        }
        if self.buffer.min_samples > self.buffer.capacity {
            return Err(Error::Configuration(
                "buffer.min_samples must not exceed buffer.capacity".into(),
            ));
        }
        Ok(())
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|c| c.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectionConfig {
    pub id: ConnectionId,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BufferConfig {
    pub capacity: usize,
    pub min_samples: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 120,
            min_samples: 30,
        }
    }
}

/// Per-metric override of the default detector tuning, merged over
/// `DetectorConfig::default()` by the engine at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DetectorOverride {
    pub warn_z: Option<f64>,
    pub crit_z: Option<f64>,
    pub consecutive_required: Option<u32>,
    pub cooldown_ms: Option<u64>,
    pub hysteresis_ratio: Option<f64>,
    pub warn_abs: Option<f64>,
    pub crit_abs: Option<f64>,
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SupervisorConfig {
    pub default_interval_ms: u64,
    pub drain_timeout_ms: u64,
    pub max_connections: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: 5_000,
            drain_timeout_ms: 5_000,
            max_connections: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CorrelatorConfig {
    pub tick_ms: u64,
    pub window_ms: u64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 5_000,
            window_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WebhookDispatchConfig {
    pub max_in_flight: usize,
    pub default_max_retries: u32,
    pub default_initial_delay_ms: u64,
    pub default_multiplier: f64,
    pub default_max_delay_ms: u64,
    pub default_timeout_ms: u64,
}

impl Default for WebhookDispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 32,
            default_max_retries: 3,
            default_initial_delay_ms: 1_000,
            default_multiplier: 2.0,
            default_max_delay_ms: 60_000,
            default_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    pub retention_hours: u64,
    pub prune_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retention_hours: 72,
            prune_interval_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoggingConfig {
    pub json: bool,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_without_connections() {
        let cfg = FleetWatchConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_with_connection_validates() {
        let mut cfg = FleetWatchConfig::default();
        cfg.connections.push(ConnectionConfig {
            id: "prod-cache-1".into(),
            name: "prod cache".into(),
            host: "localhost".into(),
            port: 6379,
            password: None,
            tls: false,
        });
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_min_samples_above_capacity() {
        let mut cfg = FleetWatchConfig::default();
        cfg.connections.push(ConnectionConfig {
            id: "a".into(),
            name: "a".into(),
            host: "localhost".into(),
            port: 6379,
            password: None,
            tls: false,
        });
        cfg.buffer.min_samples = cfg.buffer.capacity + 1;
        assert!(cfg.validate().is_err());
    }
}
