//! WebSocket Handler
//!
//! Per-connection lifecycle: Connecting (socket accepted, not yet registered)
//! → Active (registered, handshake queued, receive loop running) → Closed
//! (exactly one registry removal and roster broadcast).

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use signal_relay::{Dispatched, RelayError, Router};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::metrics::ServerMetrics;

/// RAII guard that unregisters the connection when the session ends, even if
/// the task is cancelled or panics mid-receive. Both paths close the
/// connection in the server metrics.
struct SessionGuard {
    router: Arc<Router>,
    server_metrics: Option<Arc<ServerMetrics>>,
    conn_id: String,
    armed: bool,
}

impl SessionGuard {
    fn new(
        router: Arc<Router>,
        server_metrics: Option<Arc<ServerMetrics>>,
        conn_id: String,
    ) -> Self {
        if let Some(ref m) = server_metrics {
            m.connection_opened();
        }
        Self {
            router,
            server_metrics,
            conn_id,
            armed: true,
        }
    }

    /// Normal teardown path.
    async fn close(mut self) {
        self.armed = false;
        self.router.disconnect(&self.conn_id).await;
        if let Some(ref m) = self.server_metrics {
            m.connection_closed();
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(ref m) = self.server_metrics {
            m.connection_closed();
        }
        let router = self.router.clone();
        let conn_id = std::mem::take(&mut self.conn_id);
        warn!(conn_id = %conn_id, "Session ended abnormally, scheduling cleanup");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                router.disconnect(&conn_id).await;
            });
        }
    }
}

/// Handle one relay WebSocket connection until it closes.
pub async fn handle_client_ws(
    socket: WebSocket,
    router: Arc<Router>,
    server_metrics: Option<Arc<ServerMetrics>>,
    outbox_capacity: usize,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending messages to the WebSocket
    let (tx, mut rx) = mpsc::channel::<String>(outbox_capacity);

    let connected = router.connect(tx).await;
    let conn_id = connected.id.clone();
    let guard = SessionGuard::new(router.clone(), server_metrics.clone(), conn_id.clone());

    info!(conn_id = %conn_id, name = %connected.display_name, "Client connected");

    // Task to send messages to WebSocket
    let metrics_sender = server_metrics.clone();
    let sender_task = async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                debug!("WebSocket write failed: {}", e);
                if let Some(ref m) = metrics_sender {
                    m.websocket_error();
                }
                break;
            }
        }
    };

    // Task to handle incoming messages
    let router_input = router.clone();
    let conn_input = conn_id.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    match router_input.dispatch(&conn_input, text.as_str()).await {
                        Ok(Dispatched::ShareRejected) => {
                            debug!(conn_id = %conn_input, "Broadcaster already active")
                        }
                        Ok(outcome) => debug!(conn_id = %conn_input, ?outcome, "Dispatched"),
                        Err(e) => debug!(conn_id = %conn_input, "Message not delivered: {}", e),
                    }
                }
                Ok(Message::Binary(data)) => {
                    debug!(
                        conn_id = %conn_input,
                        len = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Ok(Message::Close(frame)) => {
                    debug!(conn_id = %conn_input, ?frame, "Client closed connection");
                    return None;
                }
                // Ping/pong are answered by axum
                Ok(_) => {}
                Err(e) => return Some(RelayError::Disconnect(e.to_string())),
            }
        }
        None
    };

    let failure = tokio::select! {
        _ = sender_task => {
            debug!(conn_id = %conn_id, "Sender task ended");
            None
        }
        failure = input_task => failure,
    };

    if let Some(e) = failure {
        error!(conn_id = %conn_id, "WebSocket error: {}", e);
        if let Some(ref m) = server_metrics {
            m.websocket_error();
        }
    }

    guard.close().await;

    let remaining = router.registry().len().await;
    info!(conn_id = %conn_id, remaining, "Client disconnected");
}
