//! Wire protocol types
//!
//! Server messages are typed and serialized with a `type` tag. Client messages
//! are only partially typed: the three control messages are recognized, every
//! other record is relayed as an opaque JSON object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RelayError;

pub const SET_NAME: &str = "set-name";
pub const START_SHARE: &str = "start-share";
pub const STOP_SHARE: &str = "stop-share";

/// One row of the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
}

/// Point-in-time view of who is connected and who is broadcasting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// Connections in join order
    pub users: Vec<RosterEntry>,
    pub broadcaster: Option<String>,
}

impl Roster {
    pub fn contains(&self, id: &str) -> bool {
        self.users.iter().any(|u| u.id == id)
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.users
            .iter()
            .find(|u| u.id == id)
            .map(|u| u.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Messages sent FROM the server TO clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First message on every connection
    Init {
        id: String,
        username: String,
        broadcaster: Option<String>,
    },
    /// Sent to existing connections when someone joins
    NewClient { id: String },
    /// Full roster, sent to everyone on any membership or role change
    UserList {
        users: Vec<RosterEntry>,
        broadcaster: Option<String>,
    },
}

impl ServerMessage {
    pub fn user_list(roster: Roster) -> Self {
        ServerMessage::UserList {
            users: roster.users,
            broadcaster: roster.broadcaster,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages sent FROM clients TO the server, classified for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    SetName {
        name: String,
    },
    StartShare,
    StopShare,
    /// Anything else. `to` set means a directed relay, otherwise broadcast.
    Relay {
        to: Option<String>,
        payload: Map<String, Value>,
    },
}

impl InboundMessage {
    /// Classify a raw text frame.
    ///
    /// Control types win over `to`: a `set-name` carrying a `to` field is still
    /// a rename. Unknown or missing `type` values fall through to relaying.
    pub fn decode(text: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(payload) = value else {
            return Err(RelayError::decode("expected a JSON object"));
        };

        match payload.get("type").and_then(Value::as_str) {
            Some(SET_NAME) => {
                let name = payload
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RelayError::decode("set-name requires a string `name`"))?;
                return Ok(InboundMessage::SetName {
                    name: name.to_string(),
                });
            }
            Some(START_SHARE) => return Ok(InboundMessage::StartShare),
            Some(STOP_SHARE) => return Ok(InboundMessage::StopShare),
            _ => {}
        }

        let to = match payload.get("to") {
            None => None,
            Some(Value::String(to)) => Some(to.clone()),
            Some(other) => {
                return Err(RelayError::decode(format!(
                    "`to` must be a string, got {other}"
                )));
            }
        };

        Ok(InboundMessage::Relay { to, payload })
    }
}

/// Stamp the sender id onto a relayed record and serialize it.
///
/// Any `from` supplied by the client is overwritten.
pub fn stamp_from(
    mut payload: Map<String, Value>,
    from: &str,
) -> Result<String, serde_json::Error> {
    payload.insert("from".to_string(), Value::String(from.to_string()));
    serde_json::to_string(&Value::Object(payload))
}
