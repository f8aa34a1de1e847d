//! # Plugin Admin API
//!
//! The thin HTTP control surface over the plugin manager: register, list,
//! inspect, enable/disable, hot-reload and unregister plugins. Data-plane
//! traffic never passes through here; listings flow over the queue.

mod middleware;
mod rest;

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use estateguard_plugins::PluginManager;

pub use middleware::{trace_context, REQUEST_ID_HEADER, TRACE_ID_HEADER};
pub use rest::router;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
    pub cors_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            cors_enabled: false,
        }
    }
}

/// The admin HTTP server. Construction is cheap; `start` binds the
/// listener and serves until `stop`.
pub struct AdminApi {
    config: ApiConfig,
    manager: Arc<PluginManager>,
    shutdown: CancellationToken,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl AdminApi {
    pub fn new(config: ApiConfig, manager: Arc<PluginManager>) -> Self {
        Self {
            config,
            manager,
            shutdown: CancellationToken::new(),
            server: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<std::net::SocketAddr> {
        let app = rest::router(Arc::clone(&self.manager), self.config.cors_enabled);
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "admin API listening");

        let token = self.shutdown.clone();
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(err) = serve.await {
                warn!(error = %err, "admin API server error");
            }
        });
        *self.server.lock() = Some(server);
        Ok(local_addr)
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        let server = self.server.lock().take();
        if let Some(server) = server {
            let _ = server.await;
        }
        info!("admin API stopped");
    }
}
