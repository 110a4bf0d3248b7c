use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for routing activity, shared by every connection.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Inbound messages handed to the router
    pub messages_received: AtomicU64,
    /// Individual deliveries of relayed client messages (one per target)
    pub messages_relayed: AtomicU64,
    /// Roster broadcasts issued
    pub roster_broadcasts: AtomicU64,
    /// Inbound messages dropped as malformed
    pub decode_errors: AtomicU64,
    /// Directed messages whose target was not connected
    pub route_misses: AtomicU64,
    /// Enqueues that failed because the target outbox was full or closed
    pub send_failures: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relayed(&self, deliveries: u64) {
        self.messages_relayed.fetch_add(deliveries, Ordering::Relaxed);
    }

    pub fn record_roster_broadcast(&self) {
        self.roster_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_route_miss(&self) {
        self.route_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            roster_broadcasts: self.roster_broadcasts.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            route_misses: self.route_misses.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of relay stats (for serialization/logging)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatsSnapshot {
    pub messages_received: u64,
    pub messages_relayed: u64,
    pub roster_broadcasts: u64,
    pub decode_errors: u64,
    pub route_misses: u64,
    pub send_failures: u64,
}
