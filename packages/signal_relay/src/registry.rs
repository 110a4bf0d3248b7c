//! Connection Registry
//!
//! Single source of truth for who is connected and who holds the broadcaster
//! role. All state sits behind one `RwLock`; the sync methods on
//! [`RegistryState`] are the mutations, and [`Registry`] offers async
//! wrappers that take the lock for a single operation.
//!
//! Callers that need a mutation and the resulting fan-out to be atomic (the
//! router does) take the guard themselves via [`Registry::write`].

use std::collections::HashMap;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{Roster, RosterEntry};

/// Outbound mailbox for one connection, drained by that connection's writer.
pub type Outbox = mpsc::Sender<String>;

type IdGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Prefix for generated display names.
pub const DEFAULT_NAME_PREFIX: &str = "Guest_";

/// Length of generated connection ids, in hex characters.
pub const CONNECTION_ID_LEN: usize = 8;

/// One live client.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: String,
    pub display_name: String,
    pub outbox: Outbox,
    joined: u64,
}

/// Identity handed back to the caller of `add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub id: String,
    pub display_name: String,
}

/// Outcome of `remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Absent,
    Removed { was_broadcaster: bool },
}

impl Removal {
    pub fn is_removed(&self) -> bool {
        matches!(self, Removal::Removed { .. })
    }
}

pub fn default_display_name(id: &str) -> String {
    format!("{DEFAULT_NAME_PREFIX}{id}")
}

fn random_connection_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(CONNECTION_ID_LEN);
    id
}

/// The data guarded by the registry lock.
pub struct RegistryState {
    connections: HashMap<String, Connection>,
    broadcaster: Option<String>,
    next_join: u64,
    generate_id: IdGenerator,
}

impl RegistryState {
    fn new(generate_id: IdGenerator) -> Self {
        Self {
            connections: HashMap::new(),
            broadcaster: None,
            next_join: 0,
            generate_id,
        }
    }

    /// Register a new connection under a fresh id.
    ///
    /// Id collisions are retried, never surfaced.
    pub fn add(&mut self, outbox: Outbox) -> Connected {
        let id = loop {
            let candidate = (self.generate_id)();
            if !self.connections.contains_key(&candidate) {
                break candidate;
            }
            warn!(conn_id = %candidate, "Connection id collision, regenerating");
        };

        let display_name = default_display_name(&id);
        let joined = self.next_join;
        self.next_join += 1;

        self.connections.insert(
            id.clone(),
            Connection {
                id: id.clone(),
                display_name: display_name.clone(),
                outbox,
                joined,
            },
        );
        info!(
            conn_id = %id,
            total = self.connections.len(),
            "Connection registered"
        );

        Connected { id, display_name }
    }

    /// Drop a connection. Clears the broadcaster slot if it held it.
    pub fn remove(&mut self, id: &str) -> Removal {
        if self.connections.remove(id).is_none() {
            return Removal::Absent;
        }
        let was_broadcaster = self.broadcaster.as_deref() == Some(id);
        if was_broadcaster {
            self.broadcaster = None;
        }
        info!(
            conn_id = %id,
            total = self.connections.len(),
            was_broadcaster,
            "Connection removed"
        );
        Removal::Removed { was_broadcaster }
    }

    pub fn rename(&mut self, id: &str, name: &str) -> bool {
        match self.connections.get_mut(id) {
            Some(conn) => {
                debug!(conn_id = %id, name, "Display name changed");
                conn.display_name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Take the broadcaster slot if it is free. No preemption.
    pub fn claim_broadcaster(&mut self, id: &str) -> bool {
        if self.broadcaster.is_some() || !self.connections.contains_key(id) {
            return false;
        }
        self.broadcaster = Some(id.to_string());
        info!(conn_id = %id, "Broadcaster claimed");
        true
    }

    /// Clear the broadcaster slot if `id` holds it.
    pub fn release_broadcaster(&mut self, id: &str) -> bool {
        if self.broadcaster.as_deref() != Some(id) {
            return false;
        }
        self.broadcaster = None;
        info!(conn_id = %id, "Broadcaster released");
        true
    }

    pub fn broadcaster(&self) -> Option<&str> {
        self.broadcaster.as_deref()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    pub fn display_name(&self, id: &str) -> Option<&str> {
        self.connections.get(id).map(|c| c.display_name.as_str())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn outbox(&self, id: &str) -> Option<&Outbox> {
        self.connections.get(id).map(|c| &c.outbox)
    }

    /// Connections in join order.
    fn ordered(&self) -> Vec<&Connection> {
        let mut conns: Vec<&Connection> = self.connections.values().collect();
        conns.sort_by_key(|c| c.joined);
        conns
    }

    pub fn roster(&self) -> Roster {
        Roster {
            users: self
                .ordered()
                .into_iter()
                .map(|c| RosterEntry {
                    id: c.id.clone(),
                    name: c.display_name.clone(),
                })
                .collect(),
            broadcaster: self.broadcaster.clone(),
        }
    }

    /// Every outbox except `excluding`, in join order.
    pub fn channels(&self, excluding: Option<&str>) -> Vec<(&str, &Outbox)> {
        self.ordered()
            .into_iter()
            .filter(|c| Some(c.id.as_str()) != excluding)
            .map(|c| (c.id.as_str(), &c.outbox))
            .collect()
    }
}

/// Process-wide registry, constructed once in `main` and shared by `Arc`.
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_id_generator(random_connection_id)
    }

    /// Build a registry with a custom id source.
    pub fn with_id_generator(generate_id: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            state: RwLock::new(RegistryState::new(Box::new(generate_id))),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().await
    }

    pub async fn add(&self, outbox: Outbox) -> Connected {
        self.state.write().await.add(outbox)
    }

    pub async fn remove(&self, id: &str) -> Removal {
        self.state.write().await.remove(id)
    }

    pub async fn rename(&self, id: &str, name: &str) -> bool {
        self.state.write().await.rename(id, name)
    }

    pub async fn claim_broadcaster(&self, id: &str) -> bool {
        self.state.write().await.claim_broadcaster(id)
    }

    pub async fn release_broadcaster(&self, id: &str) -> bool {
        self.state.write().await.release_broadcaster(id)
    }

    pub async fn snapshot(&self) -> Roster {
        self.state.read().await.roster()
    }

    pub async fn lookup_channel(&self, id: &str) -> Option<Outbox> {
        self.state.read().await.outbox(id).cloned()
    }

    pub async fn all_channels(&self, excluding: Option<&str>) -> Vec<(String, Outbox)> {
        self.state
            .read()
            .await
            .channels(excluding)
            .into_iter()
            .map(|(id, outbox)| (id.to_string(), outbox.clone()))
            .collect()
    }

    pub async fn broadcaster(&self) -> Option<String> {
        self.state.read().await.broadcaster().map(str::to_string)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }
}
