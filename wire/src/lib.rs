//! Shared wire model for the pulse realtime transport.
//!
//! ARCHITECTURE
//! ============
//! This crate owns the event vocabulary spoken between the hub (`server`)
//! and clients (`client`). Events travel as JSON text frames, internally
//! tagged with an `event` field. Payloads stay opaque (`serde_json::Value`);
//! the hub relays them untouched, tagged with a room and a sender.
//!
//! DESIGN
//! ======
//! - Rooms are scoped identifiers (`workspace:` / `channel:` / `document:`)
//!   with a canonical text form used everywhere on the wire.
//! - Error events carry a grepable `E_*` code plus a human message; typed
//!   server errors map onto codes through the [`ErrorCode`] trait.
//! - No transport types leak in here. The same events ride any text channel.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error codes carried on `rejected` and `error` events.
pub mod codes {
    /// Identity token invalid or expired at connect time.
    pub const UNAUTHORIZED: &str = "E_UNAUTHORIZED";
    /// Connection's workspace scope does not cover the requested room.
    pub const ROOM_FORBIDDEN: &str = "E_ROOM_FORBIDDEN";
    /// Publish attempted by a connection not joined to the room.
    pub const NOT_A_MEMBER: &str = "E_NOT_A_MEMBER";
    /// Malformed or out-of-sequence client event.
    pub const BAD_EVENT: &str = "E_BAD_EVENT";
    /// Opaque internal fault; detail stays server-side.
    pub const INTERNAL: &str = "E_INTERNAL";
}

/// Maps a typed error onto its wire code.
pub trait ErrorCode: fmt::Display {
    fn error_code(&self) -> &'static str;
}

// =============================================================================
// ROOM IDENTIFIERS
// =============================================================================

/// Error building or parsing a [`RoomId`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomIdError {
    #[error("room id has no scope separator: {0:?}")]
    MissingScope(String),
    #[error("unknown room scope: {0:?}")]
    UnknownScope(String),
    #[error("room key must not be empty")]
    EmptyKey,
}

/// Scope discriminator for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoomScope {
    Workspace,
    Channel,
    Document,
}

impl RoomScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Channel => "channel",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for RoomScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomScope {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workspace" => Ok(Self::Workspace),
            "channel" => Ok(Self::Channel),
            "document" => Ok(Self::Document),
            other => Err(RoomIdError::UnknownScope(other.to_owned())),
        }
    }
}

/// A named scope to which connections subscribe for updates.
///
/// Canonical text form is `<scope>:<key>`, e.g. `document:acme/doc-42`.
/// Workspace rooms key on the workspace itself; channel and document rooms
/// prefix their key with the owning workspace (`<workspace>/<local-id>`),
/// which is what scope checks at join time look at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId {
    scope: RoomScope,
    key: String,
}

impl RoomId {
    /// Build a room id.
    ///
    /// # Errors
    ///
    /// Returns [`RoomIdError::EmptyKey`] when the key is empty.
    pub fn new(scope: RoomScope, key: impl Into<String>) -> Result<Self, RoomIdError> {
        let key = key.into();
        if key.is_empty() {
            return Err(RoomIdError::EmptyKey);
        }
        Ok(Self { scope, key })
    }

    #[must_use]
    pub fn scope(&self) -> RoomScope {
        self.scope
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The workspace this room belongs to: the whole key for workspace
    /// rooms, the segment before the first `/` for channel/document rooms.
    #[must_use]
    pub fn workspace(&self) -> &str {
        match self.scope {
            RoomScope::Workspace => &self.key,
            RoomScope::Channel | RoomScope::Document => {
                self.key.split_once('/').map_or(self.key.as_str(), |(ws, _)| ws)
            }
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.key)
    }
}

impl FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scope, key)) = s.split_once(':') else {
            return Err(RoomIdError::MissingScope(s.to_owned()));
        };
        Self::new(scope.parse()?, key)
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.to_string()
    }
}

// =============================================================================
// PRESENCE
// =============================================================================

/// One user's transient state within a room, as shipped in `joined` replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    pub user_id: Uuid,
    /// Opaque cursor/position blob; the hub never interprets it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
    /// Milliseconds since the Unix epoch of the last inbound event.
    pub last_seen_ms: i64,
}

// =============================================================================
// EVENTS
// =============================================================================

/// Events a client sends to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Admission handshake. Must be the first event on a fresh socket.
    Connect { token: String },
    JoinRoom { room: RoomId },
    LeaveRoom { room: RoomId },
    /// Publish an opaque payload to a room. `self_echo` opts the sender
    /// into receiving its own copy (multi-tab style updates).
    Publish {
        room: RoomId,
        payload: Value,
        #[serde(default)]
        self_echo: bool,
    },
    /// Refresh this user's presence in a room, optionally moving a cursor.
    PresenceTouch {
        room: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<Value>,
    },
    /// Liveness reply to a server `ping`.
    Pong,
}

/// Events the hub sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Admission succeeded.
    Connected { connection_id: Uuid, user_id: Uuid },
    /// Admission or join refused. Terminal for a connect attempt.
    Rejected { code: String, message: String },
    /// Join succeeded; carries the room's current presence snapshot.
    Joined { room: RoomId, presence: Vec<PresenceState> },
    Left { room: RoomId },
    /// A fan-out of one member's publish. `seq` is strictly increasing and
    /// gap-free per room from the hub's perspective.
    Update {
        room: RoomId,
        sender: Uuid,
        seq: u64,
        payload: Value,
        ts: i64,
    },
    /// A peer's presence changed.
    Presence {
        room: RoomId,
        user_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<Value>,
        ts: i64,
    },
    /// A peer left the room, explicitly or via liveness expiry.
    MemberLeft { room: RoomId, user_id: Uuid },
    /// Liveness probe; clients answer with `pong`.
    Ping,
    /// Non-fatal operation failure; the connection stays alive.
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Build a `rejected` event from a typed error.
    pub fn rejected(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Rejected { code: err.error_code().to_owned(), message: err.to_string() }
    }

    /// Build an `error` event from a typed error.
    pub fn error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error { code: err.error_code().to_owned(), message: err.to_string() }
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Error returned by the decode helpers.
#[derive(Debug, thiserror::Error)]
#[error("malformed wire event: {0}")]
pub struct CodecError(#[from] serde_json::Error);

/// Decode one client event from a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError`] for malformed JSON or unknown event tags.
pub fn decode_client(text: &str) -> Result<ClientEvent, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode one server event from a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError`] for malformed JSON or unknown event tags.
pub fn decode_server(text: &str) -> Result<ServerEvent, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode an event as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError`] if the payload contains non-serializable values
/// (cannot happen for events built from decoded input).
pub fn encode(event: &impl Serialize) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
