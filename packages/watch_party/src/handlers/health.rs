use axum::{Json, extract::State, response::IntoResponse};
use std::time::Duration;

use crate::AppState;
use crate::metrics;

/// How long a WebSocket error keeps `/health` reporting "degraded".
const DEGRADED_WINDOW: Duration = Duration::from_secs(60);

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let roster = state.router.registry().snapshot().await;
    let snapshot = state.metrics.snapshot(state.router.stats().snapshot());

    let status = if state.metrics.recent_websocket_error(DEGRADED_WINDOW) {
        "degraded"
    } else {
        "healthy"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        clients: roster.len() as u64,
        broadcaster: roster.broadcaster,
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot(state.router.stats().snapshot()))
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}
