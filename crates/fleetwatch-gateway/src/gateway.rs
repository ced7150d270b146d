//! Wires every component together: storage, the per-connection DB
//! client pool, the registry, the polling supervisor running the
//! anomaly engine, the correlator, and the webhook dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{info, warn};

use fleetwatch_common::types::{ConnectionId, ConnectionInfo};
use fleetwatch_common::{Clock, Error, FleetWatchConfig, Result, SystemClock};
use fleetwatch_correlator::Correlator;
use fleetwatch_dbclient::{DatabaseClient, ValkeyClient};
use fleetwatch_engine::{AnomalyEngine, AnomalyPollTask};
use fleetwatch_registry::ConnectionRegistry;
use fleetwatch_storage::Storage;
use fleetwatch_supervisor::{fixed_interval, LoopSpec, PollingSupervisor};
use fleetwatch_webhook::WebhookDispatcher;

const ANOMALY_LOOP: &str = "anomaly";
const CORRELATOR_TICK_LOOP: &str = "correlator-tick";
const RETRY_SCAN_INTERVAL_SECS: u64 = 10;

/// The assembled process: every long-lived component plus the handles
/// needed to serve HTTP requests against them.
pub struct Gateway {
    pub config: FleetWatchConfig,
    pub storage: Arc<dyn Storage>,
    pub registry: Arc<ConnectionRegistry>,
    pub supervisor: Arc<PollingSupervisor>,
    pub engine: Arc<AnomalyEngine>,
    pub correlator: Arc<Correlator>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub metrics_handle: PrometheusHandle,
    clients: HashMap<ConnectionId, Arc<dyn DatabaseClient>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl Gateway {
    /// Connect to every configured instance, wire the components, and
    /// start every background loop (poll loops, correlator tick,
    /// webhook retry scan). Any connection that fails to connect at
    /// startup is a fatal configuration error (§7).
    pub async fn start(config: FleetWatchConfig) -> Result<Arc<Self>> {
        let metrics_handle = fleetwatch_common::metrics::install_recorder()?;
        let storage = fleetwatch_storage::create_storage();
        let clock = Arc::new(SystemClock);
        let registry = ConnectionRegistry::new(config.supervisor.max_connections);
        let supervisor = PollingSupervisor::new(Duration::from_millis(config.supervisor.drain_timeout_ms));
        let dispatcher = WebhookDispatcher::new(storage.clone(), clock.clone(), config.webhook.max_in_flight);
        let engine = AnomalyEngine::new(
            config.buffer.capacity,
            config.buffer.min_samples,
            &config.detectors,
            1_000,
            storage.clone(),
            dispatcher.clone(),
            clock.clone(),
        );
        let correlator = Correlator::new(
            config.correlator.window_ms as i64,
            100,
            engine.events(),
            storage.clone(),
            dispatcher.clone(),
            clock.clone(),
        );

        let mut clients: HashMap<ConnectionId, Arc<dyn DatabaseClient>> = HashMap::new();
        let now_ms = clock.now_ms();
        for conn in &config.connections {
            let client = ValkeyClient::connect(&conn.host, conn.port, conn.password.as_deref(), conn.tls)
                .await
                .map_err(|e| Error::Configuration(format!("failed to connect to '{}': {e}", conn.id)))?;
            clients.insert(conn.id.clone(), Arc::new(client));

            registry
                .add(
                    ConnectionInfo {
                        id: conn.id.clone(),
                        name: conn.name.clone(),
                        host: conn.host.clone(),
                        port: conn.port,
                        password: conn.password.clone(),
                        tls: conn.tls,
                    },
                    now_ms,
                )
                .await;
        }

        supervisor.watch_registry(registry.clone());

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let gateway = Arc::new(Self {
            config,
            storage,
            registry,
            supervisor,
            engine,
            correlator,
            dispatcher,
            metrics_handle,
            clients,
            shutdown_tx,
        });

        gateway.start_poll_loops().await;
        gateway.spawn_correlator_loop();
        gateway.spawn_retry_scan(clock, shutdown_rx);
        gateway.spawn_prune_loop();

        Ok(gateway)
    }

    async fn start_poll_loops(&self) {
        for conn in &self.config.connections {
            let Some(client) = self.clients.get(&conn.id) else { continue };
            let task = AnomalyPollTask::new(self.engine.clone(), client.clone());
            self.supervisor
                .start(LoopSpec {
                    name: ANOMALY_LOOP.to_string(),
                    connection_id: conn.id.clone(),
                    interval_fn: fixed_interval(Duration::from_millis(self.config.supervisor.default_interval_ms)),
                    initial_poll: true,
                    task,
                })
                .await;
        }
    }

    fn spawn_correlator_loop(self: &Arc<Self>) {
        let correlator = self.correlator.clone();
        let tick_ms = self.config.correlator.tick_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
            loop {
                ticker.tick().await;
                correlator.tick().await;
            }
        });
        info!(loop_name = CORRELATOR_TICK_LOOP, "correlator tick loop started");
    }

    fn spawn_retry_scan(self: &Arc<Self>, clock: Arc<SystemClock>, shutdown_rx: tokio::sync::watch::Receiver<bool>) {
        let dispatcher = self.dispatcher.clone();
        let storage = self.storage.clone();
        tokio::spawn(fleetwatch_webhook::retry_scan::run(
            dispatcher,
            storage,
            clock,
            Duration::from_secs(RETRY_SCAN_INTERVAL_SECS),
            shutdown_rx,
        ));
    }

    pub fn client_for(&self, connection_id: &str) -> Option<Arc<dyn DatabaseClient>> {
        self.clients.get(connection_id).cloned()
    }

    /// Resolve the effective connection for a request: the explicit
    /// `X-Connection-Id` header if present, otherwise the registry's
    /// default.
    pub async fn resolve_connection(&self, header: Option<&str>) -> Option<ConnectionId> {
        if let Some(id) = header {
            return Some(id.to_string());
        }
        self.registry.get_default_id().await
    }

    /// Drain every background loop within the configured timeout, for
    /// graceful shutdown.
    pub async fn shutdown(&self) {
        info!("shutting down fleetwatch gateway");
        let _ = self.shutdown_tx.send(true);
        self.supervisor.stop_all().await;
    }

    fn spawn_prune_loop(self: &Arc<Self>) {
        let storage = self.storage.clone();
        let retention = chrono::Duration::hours(self.config.storage.retention_hours as i64);
        let interval_ms = self.config.storage.prune_interval_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                let cutoff = chrono::Utc::now() - retention;
                for (label, result) in [
                    ("anomaly_events", storage.prune_old_anomaly_events(cutoff).await),
                    ("correlated_groups", storage.prune_old_correlated_groups(cutoff).await),
                    ("deliveries", storage.prune_old_deliveries(cutoff).await),
                ] {
                    match result {
                        Ok(pruned) if pruned > 0 => info!(kind = label, pruned, "pruned stale records"),
                        Ok(_) => {}
                        Err(err) => warn!(kind = label, error = %err, "prune pass failed"),
                    }
                }
            }
        });
    }
}
