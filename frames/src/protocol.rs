//! Room protocol vocabulary shared by server and client.
//!
//! Syscall names, roles, and the typed payloads that ride inside
//! [`Frame::data`](crate::Frame). JSON keys are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// SYSCALLS
// =============================================================================

/// Welcome frame pushed once after the websocket upgrade.
pub const SESSION_CONNECTED: &str = "session:connected";
/// Join a room with a role. Reply: [`JoinReply`].
pub const ROOM_JOIN: &str = "room:join";
/// Ask for the room's current playback state. Reply only when one exists.
pub const ROOM_STATE_GET: &str = "room:state:get";
/// Server push: new playback state for the room.
pub const ROOM_STATE: &str = "room:state";
/// Ask for the server clock. Reply: `{now}` in epoch milliseconds.
pub const CLOCK_TIME: &str = "clock:time";
/// Host pushes its transport state.
pub const HOST_STATE: &str = "host:state";
/// Host announces a live stream and its encoding.
pub const HOST_STREAM_START: &str = "host:stream:start";
/// Host ends the live stream.
pub const HOST_STREAM_STOP: &str = "host:stream:stop";
/// Server push: a stream started, `{mimeType}`.
pub const STREAM_START: &str = "stream:start";
/// Audio fragment. Host to server, then server to guests, bytes in `payload`.
pub const STREAM_CHUNK: &str = "stream:chunk";
/// Server push: the stream ended or was invalidated.
pub const STREAM_STOP: &str = "stream:stop";

// =============================================================================
// ROLE
// =============================================================================

/// Role a connection takes when joining a room. Fixed for the connection's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    /// Parse a wire role string. Anything other than `"host"` is a guest.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("host") { Self::Host } else { Self::Guest }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Guest => "guest",
        }
    }
}

// =============================================================================
// PLAYBACK STATE
// =============================================================================

/// Last known host transport state.
///
/// `observed_at` is a server-clock timestamp in epoch milliseconds; `position`
/// is in seconds and never negative.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub is_playing: bool,
    pub position: f64,
    pub observed_at: i64,
}

impl PlaybackState {
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parse a playback state from a frame payload value.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

// =============================================================================
// STREAM STATE
// =============================================================================

/// Whether a live relay is flowing in a room and its encoding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamState {
    pub active: bool,
    pub mime_type: Option<String>,
}

impl StreamState {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn active(mime_type: impl Into<String>) -> Self {
        Self { active: true, mime_type: Some(mime_type.into()) }
    }
}

// =============================================================================
// JOIN REPLY
// =============================================================================

/// Reply payload for [`ROOM_JOIN`], sent to the joiner only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinReply {
    pub room_id: String,
    pub role: Role,
    pub has_host: bool,
    #[serde(default)]
    pub state: Option<PlaybackState>,
    #[serde(default)]
    pub stream: StreamState,
}

impl JoinReply {
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
