use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::ws;

/// Relay WebSocket endpoint - one connection per client
pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let router = state.router.clone();
    let metrics = state.metrics.clone();
    let outbox_capacity = state.server_config.outbox_capacity;

    ws.on_upgrade(move |socket| {
        ws::handle_client_ws(socket, router, Some(metrics), outbox_capacity)
    })
}
