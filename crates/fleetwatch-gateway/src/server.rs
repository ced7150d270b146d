//! HTTP server wrapper around the assembled [`Gateway`].

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use fleetwatch_common::{Error, Result};

use crate::gateway::Gateway;
use crate::handlers;

pub struct Server {
    gateway: Arc<Gateway>,
}

impl Server {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let app = self.create_app();

        info!(bind_addr, "starting fleetwatch server");

        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::Network(format!("failed to bind to {bind_addr}: {e}")))?;

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("server error: {e}")))?;

        Ok(())
    }

    fn create_app(&self) -> Router {
        let app = handlers::create_router(self.gateway.clone());

        app.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any)
                        .max_age(Duration::from_secs(3600)),
                )
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(30))),
        )
    }
}
