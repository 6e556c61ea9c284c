//! Wire types for the relay protocol.
//!
//! Every application frame is an [`Envelope`]. The relay only interprets
//! `content` for the reserved `"stage"` type; everything else is carried as
//! raw JSON and relayed byte-transparent.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Envelope type whose content is a [`StagePayload`].
pub const STAGE_TYPE: &str = "stage";

/// Envelope type announcing a departed member, content is [`ClientLeftPayload`].
pub const CLIENT_LEFT_TYPE: &str = "client_left";

/// Sender identity stamped on relay-originated envelopes.
pub const SERVER_SENDER: &str = "server";

/// The shared per-room stage: a nested grid of small integers.
/// No structural invariant beyond "last value set wins".
pub type StageGrid = Vec<Vec<Vec<i16>>>;

/// The typed wrapper around every application-level message.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload, preserved verbatim for unknown types.
    pub content: Box<RawValue>,
    /// Always overwritten by the relay; never trusted from the client.
    #[serde(default)]
    pub from: String,
}

/// Content of a `"stage"` envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct StagePayload {
    pub stage: StageGrid,
}

/// Content of a `"client_left"` envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientLeftPayload {
    pub client_id: String,
}

impl Envelope {
    /// Encode a server-originated `"stage"` envelope carrying `grid`.
    pub fn stage(grid: &StageGrid) -> serde_json::Result<String> {
        let content = serde_json::value::to_raw_value(&StagePayload {
            stage: grid.clone(),
        })?;
        serde_json::to_string(&Envelope {
            kind: STAGE_TYPE.to_string(),
            content,
            from: SERVER_SENDER.to_string(),
        })
    }

    /// Encode a server-originated `"client_left"` envelope for `client_id`.
    pub fn client_left(client_id: &str) -> serde_json::Result<String> {
        let content = serde_json::value::to_raw_value(&ClientLeftPayload {
            client_id: client_id.to_string(),
        })?;
        serde_json::to_string(&Envelope {
            kind: CLIENT_LEFT_TYPE.to_string(),
            content,
            from: SERVER_SENDER.to_string(),
        })
    }
}

/// Lifecycle of one connection, driven by the pump loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Active => write!(f, "active"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}
