//! HTTP server for health and metrics endpoints

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::metrics;
use crate::supervisor::SupervisorState;

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub supervisor: watch::Receiver<SupervisorState>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub listener: String,
    pub checkpoint_height: u64,
    pub blocks_processed: u64,
    pub nonce: u64,
}

/// Health check endpoint handler
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let listener = *state.supervisor.borrow();
    let status = match listener {
        SupervisorState::Streaming => "healthy",
        SupervisorState::Starting | SupervisorState::Restarting => "degraded",
        SupervisorState::Stopped => "stopped",
    };

    Json(HealthResponse {
        status: status.to_string(),
        listener: listener.to_string(),
        checkpoint_height: metrics::CHECKPOINT_HEIGHT.get() as u64,
        blocks_processed: metrics::BLOCKS_PROCESSED.get() as u64,
        nonce: metrics::NONCE.get() as u64,
    })
}

/// Liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Readiness check (ready once the listener is streaming blocks)
async fn readiness(State(state): State<AppState>) -> Response {
    if *state.supervisor.borrow() == SupervisorState::Streaming {
        "OK".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY").into_response()
    }
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Start the HTTP server for health and metrics
pub async fn start_server(bind_address: &str, port: u16, state: AppState) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("Health server listening on {}", addr);
    info!("  /health  - Full health status (JSON)");
    info!("  /metrics - Prometheus metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
