//! Message Router
//!
//! Turns connection lifecycle events and inbound client messages into registry
//! mutations and outbound enqueues.
//!
//! Every state change and the roster broadcast it causes happen under one
//! registry write guard, so all receivers see roster updates in the same
//! order. Enqueueing is `try_send` into bounded outboxes and never waits on a
//! peer; the actual socket writes happen in each connection's writer task.

use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

use crate::error::RelayError;
use crate::protocol::{InboundMessage, ServerMessage, stamp_from};
use crate::registry::{Connected, Outbox, Registry, RegistryState};
use crate::stats::RelayStats;

/// Messages queued to a newcomer by [`Router::connect`] before its writer runs
/// (`init` and the roster). Smaller outboxes lose part of the handshake.
pub const JOIN_BURST: usize = 2;

/// What a dispatched message ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Renamed,
    ShareStarted,
    /// Another connection already broadcasts; the claim is dropped silently.
    ShareRejected,
    ShareStopped,
    /// Valid message with no effect (e.g. stop-share from a non-broadcaster).
    Ignored,
    Relayed {
        deliveries: usize,
    },
}

pub struct Router {
    registry: Arc<Registry>,
    stats: Arc<RelayStats>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            stats: Arc::new(RelayStats::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Register a freshly accepted connection and run the join handshake:
    /// `init` to the newcomer, `new-client` to everyone else, then the roster
    /// to all.
    pub async fn connect(&self, outbox: Outbox) -> Connected {
        let mut state = self.registry.write().await;
        let connected = state.add(outbox.clone());

        let init = ServerMessage::Init {
            id: connected.id.clone(),
            username: connected.display_name.clone(),
            broadcaster: state.broadcaster().map(str::to_string),
        };
        if let Some(text) = encode(&init) {
            let _ = self.deliver(&connected.id, &outbox, text);
        }

        let announce = ServerMessage::NewClient {
            id: connected.id.clone(),
        };
        if let Some(text) = encode(&announce) {
            self.fanout(&state, Some(connected.id.as_str()), &text);
        }

        self.broadcast_roster(&state);
        connected
    }

    /// Tear down a connection: one registry removal and, if it was present,
    /// one roster broadcast. Returns whether anything was removed.
    pub async fn disconnect(&self, id: &str) -> bool {
        let mut state = self.registry.write().await;
        if !state.remove(id).is_removed() {
            return false;
        }
        self.broadcast_roster(&state);
        true
    }

    /// Handle one inbound text frame from connection `from`.
    ///
    /// Errors are already logged and counted; they never mean the connection
    /// should be closed.
    pub async fn dispatch(&self, from: &str, text: &str) -> Result<Dispatched, RelayError> {
        self.stats.record_received();

        let message = InboundMessage::decode(text).inspect_err(|e| {
            self.stats.record_decode_error();
            warn!(conn_id = %from, "Dropping malformed message: {}", e);
        })?;

        match message {
            InboundMessage::SetName { name } => {
                let mut state = self.registry.write().await;
                if !state.rename(from, &name) {
                    return Ok(Dispatched::Ignored);
                }
                self.broadcast_roster(&state);
                Ok(Dispatched::Renamed)
            }

            InboundMessage::StartShare => {
                let mut state = self.registry.write().await;
                if !state.claim_broadcaster(from) {
                    debug!(
                        conn_id = %from,
                        current = ?state.broadcaster(),
                        "start-share rejected"
                    );
                    return Ok(Dispatched::ShareRejected);
                }
                self.broadcast_roster(&state);
                Ok(Dispatched::ShareStarted)
            }

            InboundMessage::StopShare => {
                let mut state = self.registry.write().await;
                if !state.release_broadcaster(from) {
                    return Ok(Dispatched::Ignored);
                }
                self.broadcast_roster(&state);
                Ok(Dispatched::ShareStopped)
            }

            InboundMessage::Relay {
                to: Some(target),
                payload,
            } => {
                let text = stamp_from(payload, from)?;
                let state = self.registry.read().await;
                let Some(outbox) = state.outbox(&target) else {
                    self.stats.record_route_miss();
                    let err = RelayError::RouteMiss { to: target };
                    debug!(conn_id = %from, "Dropping directed message: {}", err);
                    return Err(err);
                };
                self.deliver(&target, outbox, text)?;
                self.stats.record_relayed(1);
                Ok(Dispatched::Relayed { deliveries: 1 })
            }

            InboundMessage::Relay { to: None, payload } => {
                let text = stamp_from(payload, from)?;
                let state = self.registry.read().await;
                let deliveries = self.fanout(&state, Some(from), &text);
                self.stats.record_relayed(deliveries as u64);
                Ok(Dispatched::Relayed { deliveries })
            }
        }
    }

    fn broadcast_roster(&self, state: &RegistryState) {
        let message = ServerMessage::user_list(state.roster());
        if let Some(text) = encode(&message) {
            self.fanout(state, None, &text);
            self.stats.record_roster_broadcast();
        }
    }

    /// Enqueue `text` to every connection but `excluding`. A failing target
    /// does not stop delivery to the rest. Returns the number of successful
    /// enqueues.
    fn fanout(&self, state: &RegistryState, excluding: Option<&str>, text: &str) -> usize {
        state
            .channels(excluding)
            .into_iter()
            .filter(|(id, outbox)| self.deliver(id, outbox, text.to_string()).is_ok())
            .count()
    }

    fn deliver(&self, to: &str, outbox: &Outbox, text: String) -> Result<(), RelayError> {
        outbox.try_send(text).map_err(|e| {
            self.stats.record_send_failure();
            let reason = match e {
                TrySendError::Full(_) => "outbox full",
                TrySendError::Closed(_) => "connection closed",
            };
            let err = RelayError::Send {
                to: to.to_string(),
                reason: reason.to_string(),
            };
            warn!("{}", err);
            err
        })
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match message.encode() {
        Ok(text) => Some(text),
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RosterEntry;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    struct Peer {
        id: String,
        rx: mpsc::Receiver<String>,
    }

    impl Peer {
        /// Everything queued so far, parsed as JSON.
        fn drain(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(text) = self.rx.try_recv() {
                out.push(serde_json::from_str(&text).unwrap());
            }
            out
        }

        fn drain_server(&mut self) -> Vec<ServerMessage> {
            self.drain()
                .into_iter()
                .map(|v| serde_json::from_value(v).unwrap())
                .collect()
        }
    }

    async fn join(router: &Router) -> Peer {
        join_with_capacity(router, 32).await
    }

    async fn join_with_capacity(router: &Router, capacity: usize) -> Peer {
        let (tx, rx) = mpsc::channel(capacity);
        let connected = router.connect(tx).await;
        Peer {
            id: connected.id,
            rx,
        }
    }

    fn router() -> Router {
        Router::new(Arc::new(Registry::new()))
    }

    fn user_list(users: &[&Peer], names: &[&str], broadcaster: Option<&str>) -> ServerMessage {
        ServerMessage::UserList {
            users: users
                .iter()
                .zip(names)
                .map(|(p, n)| RosterEntry {
                    id: p.id.clone(),
                    name: n.to_string(),
                })
                .collect(),
            broadcaster: broadcaster.map(str::to_string),
        }
    }

    fn guest(peer: &Peer) -> String {
        format!("Guest_{}", peer.id)
    }

    #[tokio::test]
    async fn test_three_peer_scenario() {
        let router = router();

        let mut a = join(&router).await;
        let a_name = guest(&a);
        assert_eq!(
            a.drain_server(),
            vec![
                ServerMessage::Init {
                    id: a.id.clone(),
                    username: a_name.clone(),
                    broadcaster: None,
                },
                user_list(&[&a], &[a_name.as_str()], None),
            ]
        );

        let mut b = join(&router).await;
        let b_name = guest(&b);
        let two = user_list(&[&a, &b], &[a_name.as_str(), b_name.as_str()], None);
        assert_eq!(
            a.drain_server(),
            vec![ServerMessage::NewClient { id: b.id.clone() }, two.clone()]
        );
        assert_eq!(
            b.drain_server(),
            vec![
                ServerMessage::Init {
                    id: b.id.clone(),
                    username: b_name.clone(),
                    broadcaster: None,
                },
                two,
            ]
        );

        let mut c = join(&router).await;
        let c_name = guest(&c);
        let three = user_list(
            &[&a, &b, &c],
            &[a_name.as_str(), b_name.as_str(), c_name.as_str()],
            None,
        );
        assert_eq!(a.drain_server().last(), Some(&three));
        assert_eq!(b.drain_server().last(), Some(&three));
        assert_eq!(c.drain_server().last(), Some(&three));

        let outcome = router
            .dispatch(&a.id, r#"{"type":"start-share"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Dispatched::ShareStarted);
        let sharing = user_list(
            &[&a, &b, &c],
            &[a_name.as_str(), b_name.as_str(), c_name.as_str()],
            Some(a.id.as_str()),
        );
        for peer in [&mut a, &mut b, &mut c] {
            assert_eq!(peer.drain_server(), vec![sharing.clone()]);
        }

        let outcome = router
            .dispatch(&b.id, r#"{"type":"start-share"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Dispatched::ShareRejected);
        for peer in [&mut a, &mut b, &mut c] {
            assert!(peer.drain().is_empty());
        }

        assert!(router.disconnect(&a.id).await);
        let after = user_list(&[&b, &c], &[b_name.as_str(), c_name.as_str()], None);
        assert_eq!(b.drain_server(), vec![after.clone()]);
        assert_eq!(c.drain_server(), vec![after]);
    }

    #[tokio::test]
    async fn test_init_reports_active_broadcaster() {
        let router = router();
        let mut a = join(&router).await;
        router
            .dispatch(&a.id, r#"{"type":"start-share"}"#)
            .await
            .unwrap();
        a.drain();

        let mut b = join(&router).await;
        match &b.drain_server()[0] {
            ServerMessage::Init { broadcaster, .. } => {
                assert_eq!(broadcaster.as_deref(), Some(a.id.as_str()));
            }
            other => panic!("Expected Init, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_set_name_rebroadcasts_to_everyone() {
        let router = router();
        let mut a = join(&router).await;
        let mut b = join(&router).await;
        a.drain();
        b.drain();

        let outcome = router
            .dispatch(&a.id, r#"{"type":"set-name","name":"Alice"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Dispatched::Renamed);

        let expected = user_list(&[&a, &b], &["Alice", guest(&b).as_str()], None);
        assert_eq!(a.drain_server(), vec![expected.clone()]);
        assert_eq!(b.drain_server(), vec![expected]);
    }

    #[tokio::test]
    async fn test_stop_share_only_by_holder() {
        let router = router();
        let mut a = join(&router).await;
        let mut b = join(&router).await;
        router
            .dispatch(&a.id, r#"{"type":"start-share"}"#)
            .await
            .unwrap();
        a.drain();
        b.drain();

        let outcome = router
            .dispatch(&b.id, r#"{"type":"stop-share"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Dispatched::Ignored);
        assert!(a.drain().is_empty());

        let outcome = router
            .dispatch(&a.id, r#"{"type":"stop-share"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Dispatched::ShareStopped);
        let msgs = b.drain();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["broadcaster"], Value::Null);
    }

    #[tokio::test]
    async fn test_directed_delivery() {
        let router = router();
        let mut a = join(&router).await;
        let mut b = join(&router).await;
        let mut c = join(&router).await;
        for peer in [&mut a, &mut b, &mut c] {
            peer.drain();
        }

        let text = json!({"type": "offer", "to": b.id, "offer": {"sdp": "v=0"}}).to_string();
        let outcome = router.dispatch(&a.id, &text).await.unwrap();
        assert_eq!(outcome, Dispatched::Relayed { deliveries: 1 });

        assert_eq!(
            b.drain(),
            vec![json!({"type": "offer", "to": b.id, "from": a.id, "offer": {"sdp": "v=0"}})]
        );
        assert!(a.drain().is_empty());
        assert!(c.drain().is_empty());
    }

    #[tokio::test]
    async fn test_directed_to_unknown_target_is_route_miss() {
        let router = router();
        let mut a = join(&router).await;
        a.drain();

        let err = router
            .dispatch(&a.id, r#"{"type":"answer","to":"ffffffff"}"#)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RelayError::RouteMiss {
                to: "ffffffff".to_string()
            }
        );
        assert!(a.drain().is_empty());
        assert_eq!(router.stats().snapshot().route_misses, 1);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let router = router();
        let mut a = join(&router).await;
        let mut b = join(&router).await;
        let mut c = join(&router).await;
        for peer in [&mut a, &mut b, &mut c] {
            peer.drain();
        }

        let outcome = router
            .dispatch(&a.id, r#"{"type":"seek","time":42}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Dispatched::Relayed { deliveries: 2 });

        let expected = json!({"type": "seek", "time": 42, "from": a.id});
        assert_eq!(b.drain(), vec![expected.clone()]);
        assert_eq!(c.drain(), vec![expected]);
        assert!(a.drain().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let router = router();
        let mut a = join(&router).await;
        let mut b = join(&router).await;
        a.drain();
        b.drain();

        assert!(matches!(
            router.dispatch(&a.id, "{{{").await,
            Err(RelayError::Decode(_))
        ));
        assert!(matches!(
            router.dispatch(&a.id, r#"{"type":"set-name"}"#).await,
            Err(RelayError::Decode(_))
        ));
        assert!(b.drain().is_empty());

        // The connection keeps working afterwards
        router.dispatch(&a.id, r#"{"type":"play"}"#).await.unwrap();
        assert_eq!(b.drain().len(), 1);

        let stats = router.stats().snapshot();
        assert_eq!(stats.decode_errors, 2);
        assert_eq!(stats.messages_received, 3);
    }

    #[tokio::test]
    async fn test_full_outbox_does_not_block_others() {
        let router = router();
        let mut a = join(&router).await;
        // init + roster fill this one up immediately
        let mut slow = join_with_capacity(&router, 2).await;
        let mut c = join(&router).await;
        a.drain();
        c.drain();

        let outcome = router
            .dispatch(&a.id, r#"{"type":"pause"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Dispatched::Relayed { deliveries: 1 });
        assert_eq!(c.drain().len(), 1);
        assert!(router.stats().snapshot().send_failures >= 1);

        // The slow peer still has its handshake queued
        assert_eq!(slow.drain().len(), 2);
    }

    #[tokio::test]
    async fn test_handshake_fits_minimum_outbox() {
        let router = router();
        let mut newcomer = join_with_capacity(&router, JOIN_BURST).await;

        let received = newcomer.drain_server();
        assert_eq!(received.len(), 2);
        assert!(matches!(received[0], ServerMessage::Init { .. }));
        assert!(matches!(received[1], ServerMessage::UserList { .. }));
        assert_eq!(router.stats().snapshot().send_failures, 0);
    }

    #[tokio::test]
    async fn test_closed_outbox_counts_as_send_failure() {
        let router = router();
        let mut a = join(&router).await;
        let b = join(&router).await;
        a.drain();
        drop(b.rx);

        let text = json!({"type": "ice-candidate", "to": b.id}).to_string();
        let err = router.dispatch(&a.id, &text).await.unwrap_err();
        assert!(matches!(err, RelayError::Send { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let router = router();
        let a = join(&router).await;
        let mut b = join(&router).await;
        b.drain();

        assert!(router.disconnect(&a.id).await);
        assert!(!router.disconnect(&a.id).await);
        assert_eq!(b.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnecting_broadcaster_releases_role() {
        let router = router();
        let a = join(&router).await;
        let mut b = join(&router).await;
        router
            .dispatch(&a.id, r#"{"type":"start-share"}"#)
            .await
            .unwrap();
        router.disconnect(&a.id).await;
        b.drain();

        let outcome = router
            .dispatch(&b.id, r#"{"type":"start-share"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Dispatched::ShareStarted);
        assert_eq!(
            router.registry().broadcaster().await.as_deref(),
            Some(b.id.as_str())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_single_winner() {
        let router = Arc::new(router());
        let mut peers = Vec::new();
        for _ in 0..16 {
            peers.push(join(&router).await);
        }

        let mut handles = Vec::new();
        for peer in &peers {
            let router = router.clone();
            let id = peer.id.clone();
            handles.push(tokio::spawn(async move {
                router
                    .dispatch(&id, r#"{"type":"start-share"}"#)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() == Dispatched::ShareStarted {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(router.registry().broadcaster().await.is_some());
    }
}
