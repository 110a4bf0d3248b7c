//! Relay error taxonomy.
//!
//! Every variant is contained to the connection or the single send it came
//! from. Nothing here is fatal to the process.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Inbound payload is not a usable structured record.
    #[error("malformed message: {0}")]
    Decode(String),

    /// A directed message named a connection that is not registered.
    #[error("no live connection for target {to}")]
    RouteMiss { to: String },

    /// Enqueueing onto a peer's outbox failed (peer gone or outbox full).
    #[error("send to {to} failed: {reason}")]
    Send { to: String, reason: String },

    /// The inbound side of a connection closed or errored.
    #[error("connection closed: {0}")]
    Disconnect(String),
}

impl RelayError {
    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        RelayError::Decode(msg.into())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Decode(err.to_string())
    }
}
