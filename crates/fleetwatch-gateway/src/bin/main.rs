//! FleetWatch main executable.

use clap::{Arg, ArgAction, Command};
use fleetwatch_common::{observability, FleetWatchConfig};
use fleetwatch_gateway::{init_gateway, start_server};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let matches = Command::new("fleetwatch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Streaming anomaly detection and alerting for Valkey/Redis fleets")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .required(false),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (overrides the config file)")
                .required(false),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose (debug) logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let mut config = match FleetWatchConfig::load(matches.get_one::<String>("config").map(|s| s.as_str())) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };
    if matches.get_flag("verbose") {
        config.logging.filter = "debug".to_string();
    }
    observability::init_tracing(&config.logging);

    let bind_addr = matches
        .get_one::<String>("bind")
        .cloned()
        .unwrap_or_else(|| format!("{}:{}", config.server.bind_address, config.server.port));

    info!(version = env!("CARGO_PKG_VERSION"), %bind_addr, "starting fleetwatch");

    let gateway = match init_gateway(config).await {
        Ok(gateway) => gateway,
        Err(err) => {
            error!(error = %err, "failed to initialize gateway");
            std::process::exit(1);
        }
    };

    let shutdown_gateway = gateway.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
        info!("received shutdown signal, draining in-flight work");
        shutdown_gateway.shutdown().await;
        std::process::exit(0);
    });

    if let Err(err) = start_server(gateway, &bind_addr).await {
        error!(error = %err, "server error");
        std::process::exit(1);
    }
}
