//! Session protocol: the room state machine as pure functions.
//!
//! DESIGN
//! ======
//! Every mutating event takes the current `RoomState` and the sender's
//! connection id and returns either the next state plus the effect peers
//! must observe, or a `Rejection`. Nothing here touches sockets, locks, or
//! clocks; the registry commits a transition and the gateway fans out its
//! effect.
//!
//! AUTHORIZATION
//! =============
//! Only the connection in `HostSlot::Hosted` may mutate shared state. A
//! guest or a former host is rejected with `E_NOT_HOST` and the room is
//! left untouched.

use frames::protocol::{PlaybackState, StreamState};
use serde_json::Value;

use crate::frame::ErrorCode;
use crate::state::{ConnectionId, HostSlot, RoomState};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("room key required")]
    MissingRoomKey,
    #[error("room not found: {0}")]
    UnknownRoom(String),
    #[error("connection is not a member of the room")]
    NotMember,
    #[error("connection already joined a room")]
    AlreadyJoined,
    #[error("sender is not the room host")]
    NotHost,
    #[error("no active stream")]
    StreamInactive,
    #[error("mimeType required")]
    MissingMimeType,
    #[error("room has no playback state")]
    NoPlaybackState,
    #[error("unknown op: {0}")]
    UnknownOp(String),
}

impl ErrorCode for Rejection {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingRoomKey => "E_MISSING_ROOM",
            Self::UnknownRoom(_) => "E_UNKNOWN_ROOM",
            Self::NotMember => "E_NOT_MEMBER",
            Self::AlreadyJoined => "E_ALREADY_JOINED",
            Self::NotHost => "E_NOT_HOST",
            Self::StreamInactive => "E_STREAM_INACTIVE",
            Self::MissingMimeType => "E_MISSING_MIME",
            Self::NoPlaybackState => "E_NO_STATE",
            Self::UnknownOp(_) => "E_UNKNOWN_OP",
        }
    }
}

/// Host-issued mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    UpdatePlayback(PlaybackState),
    StartStream { mime_type: String },
    RelayChunk,
    StopStream,
}

/// What the other members of the room must be told.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PlaybackChanged(PlaybackState),
    StreamStarted { mime_type: String },
    ChunkRelayed,
    StreamStopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: RoomState,
    pub effect: Effect,
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Succeeds only if `sender` currently holds the host slot.
///
/// # Errors
///
/// `NotHost` otherwise.
pub fn authorize_host(state: &RoomState, sender: ConnectionId) -> Result<(), Rejection> {
    if state.host.is_held_by(sender) { Ok(()) } else { Err(Rejection::NotHost) }
}

/// Apply a host command to a room.
///
/// # Errors
///
/// `NotHost` for any sender but the current host, `MissingMimeType` for a
/// blank stream encoding, `StreamInactive` for a chunk outside a stream.
pub fn apply(state: &RoomState, sender: ConnectionId, command: Command) -> Result<Transition, Rejection> {
    authorize_host(state, sender)?;

    let mut next = state.clone();
    let effect = match command {
        Command::UpdatePlayback(playback) => {
            next.playback = Some(playback);
            Effect::PlaybackChanged(playback)
        }
        Command::StartStream { mime_type } => {
            let mime_type = mime_type.trim();
            if mime_type.is_empty() {
                return Err(Rejection::MissingMimeType);
            }
            next.stream = StreamState::active(mime_type);
            Effect::StreamStarted { mime_type: mime_type.to_owned() }
        }
        Command::RelayChunk => {
            if !state.stream.active {
                return Err(Rejection::StreamInactive);
            }
            Effect::ChunkRelayed
        }
        Command::StopStream => {
            next.stream = StreamState::inactive();
            Effect::StreamStopped
        }
    };

    Ok(Transition { state: next, effect })
}

/// Hand the host slot to `conn`.
///
/// A live stream belongs to whoever started it, so a handover while one is
/// active also ends it and reports `StreamStopped`.
#[must_use]
pub fn claim_host(state: &RoomState, conn: ConnectionId) -> (RoomState, Option<Effect>) {
    let mut next = state.clone();
    next.host = HostSlot::Hosted(conn);

    let handover = state.host.is_hosted() && !state.host.is_held_by(conn);
    if handover && state.stream.active {
        next.stream = StreamState::inactive();
        return (next, Some(Effect::StreamStopped));
    }
    (next, None)
}

/// Release the host slot when `leaver` is the current host.
///
/// Returns `None` for anyone else. Playback state survives so a later host
/// or guest still sees the last known position.
#[must_use]
pub fn release_host(state: &RoomState, leaver: ConnectionId) -> Option<Transition> {
    if !state.host.is_held_by(leaver) {
        return None;
    }
    let next = RoomState { host: HostSlot::Unowned, playback: state.playback, stream: StreamState::inactive() };
    Some(Transition { state: next, effect: Effect::StreamStopped })
}

// =============================================================================
// COERCION
// =============================================================================

/// Build a playback state from an untyped host update.
///
/// `isPlaying` accepts booleans or truthy values. `position` accepts numbers
/// or numeric strings; anything missing, invalid, or negative becomes 0.
/// `at` is kept when it is a positive timestamp, otherwise `now_ms`.
#[must_use]
pub fn coerce_playback(raw: &Value, now_ms: i64) -> PlaybackState {
    let is_playing = raw.get("isPlaying").is_some_and(truthy);

    let position = raw
        .get("position")
        .and_then(number)
        .filter(|p| p.is_finite() && *p >= 0.0)
        .unwrap_or(0.0);

    #[allow(clippy::cast_possible_truncation)]
    let observed_at = raw
        .get("at")
        .and_then(number)
        .filter(|at| at.is_finite() && *at > 0.0 && *at < 9.0e15)
        .map_or(now_ms, |at| at.round() as i64);

    PlaybackState { is_playing, position, observed_at }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
