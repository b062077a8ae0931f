//! HTTP server loop
//!
//! Serves the router until the shutdown future resolves, then releases every
//! bound model.

use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::routes::{build_router, ModelBinding};

/// HTTP front end for a fixed set of model bindings
pub struct ApiServer {
    /// Address to bind when no listener is supplied
    address: SocketAddr,

    /// Model bindings, in the order they are listed
    bindings: Vec<Arc<ModelBinding>>,
}

impl ApiServer {
    /// Creates a server for `bindings`
    pub fn new(address: SocketAddr, bindings: Vec<Arc<ModelBinding>>) -> Self {
        Self { address, bindings }
    }

    /// Configured bind address
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Serves until Ctrl-C
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Binds the configured address and serves until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.address)
            .with_context(|| format!("failed to bind {}", self.address))?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_address = listener.local_addr()?;
        let router = build_router(self.bindings.clone());

        info!(
            "LLM Serve listening on {} with {} model(s)",
            local_address,
            self.bindings.len()
        );

        let served = match axum::Server::from_tcp(listener) {
            Ok(builder) => builder
                .serve(router.into_make_service())
                .with_graceful_shutdown(shutdown)
                .await
                .context("HTTP server failed"),
            Err(e) => Err(e).context("failed to use listener"),
        };

        info!("HTTP server stopped, releasing models");
        self.shutdown_models().await;

        served
    }

    async fn shutdown_models(&self) {
        for binding in &self.bindings {
            if let Err(e) = binding.manager.shutdown().await {
                error!("Failed to release model {}: {}", binding.name, e);
            }
        }
    }
}

/// Resolves when the process receives Ctrl-C
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
