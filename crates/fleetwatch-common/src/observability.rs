//! Tracing-subscriber initialization, grounded on the teacher's
//! gateway-binary setup: `EnvFilter` driven by config/env, with a JSON
//! or compact formatter selected at startup.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global `tracing` subscriber. Call once from `main`.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt().with_env_filter(filter).with_target(true);

    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
