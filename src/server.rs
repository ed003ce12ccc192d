//! HTTP trigger server for host sync opportunities.
//!
//! The host (a connectivity watcher, a cron entry, a push webhook) tells
//! fieldsync that a sync opportunity exists by POSTing the queue's sync tag:
//!
//! | Route              | Method | Response                                   |
//! |--------------------|--------|--------------------------------------------|
//! | `/health`          | GET    | `ok`                                       |
//! | `/sync/tags`       | GET    | JSON array of registered tags              |
//! | `/sync/{tag}`      | POST   | `FlushReport` as JSON; 404 for unknown tags |
//! | `/status`          | GET    | JSON array of per-queue `QueueStats`       |
//!
//! A flush never fails as a whole, so `/sync/{tag}` answers `200 OK` even
//! when every record stayed queued; the report says how many are pending.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::sync::SyncService;

/// Build the axum router with all endpoints.
pub fn build_router(service: SyncService) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sync/tags", get(tags_handler))
        .route("/sync/{tag}", post(trigger_handler))
        .route("/status", get(status_handler))
        .with_state(service)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn tags_handler(State(service): State<SyncService>) -> Json<Vec<String>> {
    Json(service.registered_tags())
}

async fn trigger_handler(
    State(service): State<SyncService>,
    Path(tag): Path<String>,
) -> Response {
    match service.trigger(&tag).await {
        Some(report) => Json(report).into_response(),
        None => (StatusCode::NOT_FOUND, format!("Unknown sync tag: {}", tag)).into_response(),
    }
}

async fn status_handler(State(service): State<SyncService>) -> Response {
    match service.store().stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to read queue stats");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Trigger server bound to a local address.
pub struct TriggerServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    addr: SocketAddr,
}

impl TriggerServer {
    /// Bind and start serving in a background task.
    pub async fn start(bind: &str, service: SyncService) -> Result<Self> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("Failed to bind trigger server on {}", bind))?;
        let addr = listener
            .local_addr()
            .context("Failed to get server address")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = build_router(service);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!(error = %e, "Trigger server error");
            }
        });

        info!(%addr, "Trigger server listening");
        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop the server gracefully.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TriggerServer {
    fn drop(&mut self) {
        self.stop();
    }
}
