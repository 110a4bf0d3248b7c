//! Server metrics for observability
//!
//! Connection counters live here; routing counters come from the relay's
//! own `RelayStats` and are folded into the snapshot.

use serde::{Deserialize, Serialize};
use signal_relay::RelayStatsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Currently open WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// WebSocket read/write errors
    pub websocket_errors: AtomicU64,
    /// Uptime second of the latest WebSocket error, plus one (0 = never)
    last_error_at: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn websocket_error(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
        self.last_error_at.store(self.uptime_secs() + 1, Ordering::Relaxed);
    }

    /// Whether a WebSocket error happened within the last `window`.
    pub fn recent_websocket_error(&self, window: Duration) -> bool {
        error_within(
            self.uptime_secs(),
            self.last_error_at.load(Ordering::Relaxed),
            window,
        )
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self, relay: RelayStatsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            websocket_errors: self.websocket_errors.load(Ordering::Relaxed),
            relay,
        }
    }
}

fn error_within(now_secs: u64, last_error_at: u64, window: Duration) -> bool {
    match last_error_at {
        0 => false,
        at => now_secs.saturating_sub(at - 1) < window.as_secs(),
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub websocket_errors: u64,
    pub relay: RelayStatsSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    /// Connections currently in the registry
    pub clients: u64,
    pub broadcaster: Option<String>,
    pub uptime_secs: u64,
}
