//! Relay WebSocket
//!
//! One WebSocket per client. The per-connection task bridges the socket to the
//! shared `signal_relay::Router`: a writer drains the connection's outbox into
//! the socket, a reader dispatches each text frame.

mod handler;

pub use handler::handle_client_ws;
