//! Signal Relay - connection registry and message routing for the watch party
//! signaling server.
//!
//! This crate has no HTTP or WebSocket dependencies. A transport hands each
//! accepted connection's outbound mailbox to [`Router::connect`], feeds inbound
//! text frames to [`Router::dispatch`], drains the mailbox into its socket, and
//! calls [`Router::disconnect`] exactly once when the connection ends.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use signal_relay::{Registry, Router};
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let router = Router::new(Arc::new(Registry::new()));
//!
//! let (tx, mut rx) = mpsc::channel(16);
//! let me = router.connect(tx).await;
//!
//! // `init` comes first, then the roster
//! let init = rx.recv().await.unwrap();
//! assert!(init.contains(r#""type":"init""#));
//!
//! router
//!     .dispatch(&me.id, r#"{"type":"set-name","name":"Alice"}"#)
//!     .await
//!     .unwrap();
//! router.disconnect(&me.id).await;
//! # }
//! ```

mod error;
pub mod protocol;
pub mod registry;
mod router;
mod stats;

pub use error::RelayError;
pub use protocol::{InboundMessage, Roster, RosterEntry, ServerMessage};
pub use registry::{Connected, Outbox, Registry, Removal};
pub use router::{Dispatched, JOIN_BURST, Router};
pub use stats::{RelayStats, RelayStatsSnapshot};
