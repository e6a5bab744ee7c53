//! Server-side frame.
//!
//! Handlers work on this type instead of `frames::Frame`: ids are parsed
//! `Uuid`s and `data` is always a flat map, so dispatch code never has to
//! cope with a non-object payload. Conversion happens once per message at
//! the socket edge (`TryFrom<frames::Frame>` inbound, `From<&Frame>`
//! outbound).
//!
//! Requests arrive with `Status::Request`. Replies are `Done` frames whose
//! `parent_id` names the request. Room pushes (`room:state`, `stream:*`)
//! reuse `Request` status and carry no parent.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub use frames::Status;
use serde_json::Value;
use uuid::Uuid;

/// Control payload of a frame.
pub type Data = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Epoch milliseconds, stamped when the frame is built.
    pub ts: i64,
    pub room_id: Option<String>,
    /// Connection id of the sender, filled in by the gateway.
    pub from: Option<String>,
    pub syscall: String,
    pub status: Status,
    pub data: Data,
    /// Opaque audio bytes. Only `stream:chunk` uses it.
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid frame id: {0}")]
    InvalidId(String),
    #[error("invalid parent id: {0}")]
    InvalidParentId(String),
}

/// Stable code attached to every rejection log line.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_millis()).ok())
        .unwrap_or_default()
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

impl Frame {
    fn stamped(syscall: String, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: wall_clock_ms(),
            room_id: None,
            from: None,
            syscall,
            status,
            data,
            payload: None,
        }
    }

    /// New request-status frame. Server pushes are built this way too.
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self::stamped(syscall.into(), Status::Request, data)
    }

    /// Terminal reply to `self`, scoped to the same room.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        Self {
            parent_id: Some(self.id),
            room_id: self.room_id.clone(),
            ..Self::stamped(self.syscall.clone(), Status::Done, data)
        }
    }

    #[must_use]
    pub fn with_room_id(self, room_id: impl Into<String>) -> Self {
        Self { room_id: Some(room_id.into()), ..self }
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_payload(self, payload: Option<Vec<u8>>) -> Self {
        Self { payload, ..self }
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Frame {
    /// Extract the syscall prefix (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall
            .split_once(':')
            .map_or(self.syscall.as_str(), |(prefix, _)| prefix)
    }

    /// Everything after the prefix, e.g. `"stream:start"` for `"host:stream:start"`.
    #[must_use]
    pub fn op(&self) -> &str {
        self.syscall.split_once(':').map_or("", |(_, op)| op)
    }

    /// Room key from the frame header, falling back to `data.roomId`.
    #[must_use]
    pub fn room_key(&self) -> Option<&str> {
        self.room_id
            .as_deref()
            .or_else(|| self.data.get("roomId").and_then(Value::as_str))
    }
}

// =============================================================================
// WIRE CONVERSION
// =============================================================================

impl From<&Frame> for frames::Frame {
    fn from(frame: &Frame) -> Self {
        Self {
            id: frame.id.to_string(),
            parent_id: frame.parent_id.map(|id| id.to_string()),
            ts: frame.ts,
            room_id: frame.room_id.clone(),
            from: frame.from.clone(),
            syscall: frame.syscall.clone(),
            status: frame.status,
            data: Value::Object(frame.data.clone().into_iter().collect()),
            payload: frame.payload.clone(),
        }
    }
}

impl TryFrom<frames::Frame> for Frame {
    type Error = FrameError;

    fn try_from(wire: frames::Frame) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&wire.id).map_err(|_| FrameError::InvalidId(wire.id.clone()))?;
        let parent_id = match wire.parent_id {
            Some(raw) => Some(Uuid::parse_str(&raw).map_err(|_| FrameError::InvalidParentId(raw.clone()))?),
            None => None,
        };
        let data = match wire.data {
            Value::Object(map) => map.into_iter().collect(),
            _ => Data::new(),
        };

        Ok(Self {
            id,
            parent_id,
            ts: wire.ts,
            room_id: wire.room_id.filter(|r| !r.is_empty()),
            from: wire.from,
            syscall: wire.syscall,
            status: wire.status,
            data,
            payload: wire.payload,
        })
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
