mod routes;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{config::ServerConfig, dispatch::Dispatcher, Result};

pub struct Server {
    dispatcher: Arc<Dispatcher>,
    body_limit: usize,
    verbose: bool,
}

impl Server {
    pub fn new(config: &ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            body_limit: config.body_limit,
            verbose: config.verbose,
        }
    }

    /// Every path not listed here is treated as the Alertmanager webhook.
    pub fn build_router(self) -> Router {
        let state = Arc::new(self);

        Router::new()
            .route("/health", get(routes::health))
            .route("/metrics", get(routes::metrics))
            .fallback(routes::webhook)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(state)
    }

    pub async fn start(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Starting server on {}", listener.local_addr()?);

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
