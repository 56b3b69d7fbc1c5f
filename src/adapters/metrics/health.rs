//! Health Check Server - Liveness and Readiness Probes
//!
//! Exposes /live and /ready endpoints via axum 0.7 for Docker
//! health checks and monitoring. Readiness depends on startup having
//! completed and the record store being writable.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::ports::repository::Repository;

/// Shared health state polled by readiness probes.
#[derive(Clone)]
pub struct HealthState {
    /// Set once accounts/agents are seeded and autostart has run.
    pub started: Arc<AtomicBool>,
    repo: Arc<dyn Repository>,
}

impl HealthState {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            started: Arc::new(AtomicBool::new(false)),
            repo,
        }
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Relaxed);
    }

    /// Check if the system is ready to serve traffic.
    pub async fn is_ready(&self) -> bool {
        self.started.load(Ordering::Relaxed) && self.repo.is_healthy().await
    }
}

/// Axum-based health check HTTP server.
pub struct HealthServer {
    state: HealthState,
    port: u16,
}

impl HealthServer {
    pub fn new(state: HealthState, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until shutdown.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(self.state);

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
        if state.is_ready().await {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::JsonStore;

    #[tokio::test]
    async fn test_not_ready_until_started() {
        let state = HealthState::new(Arc::new(JsonStore::ephemeral()));
        assert!(!state.is_ready().await);
        state.mark_started();
        assert!(state.is_ready().await);
    }
}
