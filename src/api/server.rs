//! HTTP API Server
//!
//! Serves the admission webhook or the node agent's trigger endpoint.

use crate::error::{Error, Result};
use axum::Router;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Bind address
    pub listen_addr: SocketAddr,
    /// Max request body size
    pub max_body_size: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9443)),
            max_body_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

pub struct ApiServer {
    config: ApiServerConfig,
    shutdown: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop serving once `shutdown` is cancelled
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &ApiServerConfig {
        &self.config
    }

    /// Serve `router` until [`ApiServer::shutdown`] is called
    pub async fn run(&self, router: Router) -> Result<()> {
        let addr = self.config.listen_addr;
        let shutdown = self.shutdown.clone();
        let app = router.layer(axum::extract::DefaultBodyLimit::max(self.config.max_body_size));

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind API server on {}: {}", addr, e)))?;
        info!("API server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("API server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("API server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
