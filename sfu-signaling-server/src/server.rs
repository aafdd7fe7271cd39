//! Server orchestration
//!
//! Owns the HTTP listener, the periodic stats task and graceful shutdown.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use sfu_signaling::{Config, OrchestratorStats, SignalingOrchestrator};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::ws::websocket_handler;

/// State shared by every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SignalingOrchestrator>,
    pub max_message_size: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Signaling server: WebSocket endpoint plus health and stats routes
pub struct SignalingServer {
    config: Config,
    orchestrator: Arc<SignalingOrchestrator>,
}

impl SignalingServer {
    #[must_use]
    pub const fn new(config: Config, orchestrator: Arc<SignalingOrchestrator>) -> Self {
        Self { config, orchestrator }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            orchestrator: Arc::clone(&self.orchestrator),
            max_message_size: self.config.server.max_message_size,
        };

        Router::new()
            .route("/ws", get(websocket_handler))
            .route("/health", get(health))
            .route("/stats", get(stats))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Start serving and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let shutdown = CancellationToken::new();

        let http_handle = self.start_http_server(shutdown.clone()).await?;
        let stats_handle = self.start_stats_task(shutdown.clone());

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        shutdown.cancel();
        if let Some(handle) = stats_handle {
            let _ = handle.await;
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        info!("Shutting down signaling server...");
        let closed = self.orchestrator.disconnect_all().await;
        let stats = self.orchestrator.stats();
        info!(
            sessions_closed = closed,
            transports = stats.transports,
            producers = stats.producers,
            consumers = stats.consumers,
            "Signaling server shutdown complete"
        );
    }

    /// Bind eagerly so an address conflict fails startup instead of a background task
    async fn start_http_server(
        &self,
        shutdown: CancellationToken,
    ) -> anyhow::Result<JoinHandle<()>> {
        let address = self.config.listen_address();
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind signaling address {address}: {e}"))?;
        info!("Signaling server listening on {}", address);

        let router = self.router();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("HTTP server error: {}", e);
            }
            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }

    fn start_stats_task(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let interval_secs = self.config.sfu.stats_interval_seconds;
        if interval_secs == 0 {
            return None;
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let stats = orchestrator.stats();
                        info!(
                            peers = stats.peers,
                            transports = stats.transports,
                            producers = stats.producers,
                            consumers = stats.consumers,
                            "SFU stats"
                        );
                    }
                }
            }
        }))
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats(State(state): State<AppState>) -> Json<OrchestratorStats> {
    Json(state.orchestrator.stats())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
