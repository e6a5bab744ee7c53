//! Room frames and their binary encoding.
//!
//! LAYOUT
//! ======
//! - `Frame` / `Status`: the in-memory message shared by server and client.
//! - `wire`: the prost message actually written to the socket.
//! - `json`: the `serde_json::Value` ⇄ `prost_types::Value` bridge that
//!   carries control data.
//! - `protocol`: syscall names and typed payloads.
//!
//! Audio fragments never pass through JSON. They ride in `payload` and are
//! copied as opaque bytes.

mod json;
pub mod protocol;
mod wire;

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire::WireFrame;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame bytes: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("unknown frame status code {0}")]
    InvalidStatus(i32),
}

// =============================================================================
// STATUS
// =============================================================================

/// Where a frame sits in a request/reply exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Client request, or an unsolicited server push.
    Request,
    Item,
    Done,
    Error,
    Cancel,
}

impl Status {
    /// `Done`, `Error` and `Cancel` close an exchange.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancel)
    }

    /// Numeric code written to the wire.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Request => 0,
            Self::Done => 1,
            Self::Error => 2,
            Self::Cancel => 3,
            Self::Item => 4,
        }
    }

    /// Inverse of [`Status::code`].
    ///
    /// # Errors
    ///
    /// `InvalidStatus` for a code no variant uses.
    pub fn from_code(code: i32) -> Result<Self, CodecError> {
        [Self::Request, Self::Done, Self::Error, Self::Cancel, Self::Item]
            .into_iter()
            .find(|status| status.code() == code)
            .ok_or(CodecError::InvalidStatus(code))
    }
}

// =============================================================================
// FRAME
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: String,
    /// Request this frame answers.
    pub parent_id: Option<String>,
    /// Epoch milliseconds at creation; 0 when the sender did not stamp it.
    pub ts: i64,
    pub room_id: Option<String>,
    pub from: Option<String>,
    pub syscall: String,
    pub status: Status,
    pub data: Value,
    /// Raw audio bytes for `stream:chunk`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
}

impl Frame {
    #[must_use]
    pub fn request(id: impl Into<String>, syscall: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            ts: 0,
            room_id: None,
            from: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
            payload: None,
        }
    }

    #[must_use]
    pub fn with_room_id(self, room_id: impl Into<String>) -> Self {
        Self { room_id: Some(room_id.into()), ..self }
    }

    #[must_use]
    pub fn with_ts(self, ts: i64) -> Self {
        Self { ts, ..self }
    }

    #[must_use]
    pub fn with_payload(self, payload: Vec<u8>) -> Self {
        Self { payload: Some(payload), ..self }
    }

    /// `data.message` of an error reply.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.data.get("message")?.as_str()
    }
}

// =============================================================================
// CODEC
// =============================================================================

#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    // Not `WireFrame::from`: prost derives a `from()` getter for the field.
    let wire: WireFrame = frame.into();
    wire.encode_to_vec()
}

/// # Errors
///
/// `Decode` for bytes that are not a frame, `InvalidStatus` for an unknown
/// status code.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    Frame::try_from(WireFrame::decode(bytes)?)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
