//! Protobuf message for one frame.
//!
//! Field tags are fixed; `status` is a plain int32 holding
//! [`Status::code`](crate::Status::code).

use serde_json::{Map, Value};

use crate::{CodecError, Frame, Status, json};

#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct WireFrame {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, optional, tag = "2")]
    pub parent_id: Option<String>,
    #[prost(int64, tag = "3")]
    pub ts: i64,
    #[prost(string, optional, tag = "4")]
    pub room_id: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub from: Option<String>,
    #[prost(string, tag = "6")]
    pub syscall: String,
    #[prost(int32, tag = "7")]
    pub status: i32,
    #[prost(message, optional, tag = "8")]
    pub data: Option<prost_types::Value>,
    #[prost(bytes = "vec", optional, tag = "9")]
    pub payload: Option<Vec<u8>>,
}

impl From<&Frame> for WireFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            id: frame.id.clone(),
            parent_id: frame.parent_id.clone(),
            ts: frame.ts,
            room_id: frame.room_id.clone(),
            from: frame.from.clone(),
            syscall: frame.syscall.clone(),
            status: frame.status.code(),
            data: Some(json::to_proto(&frame.data)),
            payload: frame.payload.clone(),
        }
    }
}

impl TryFrom<WireFrame> for Frame {
    type Error = CodecError;

    fn try_from(wire: WireFrame) -> Result<Self, CodecError> {
        let status = Status::from_code(wire.status)?;
        // A frame without data reads as an empty object.
        let data = wire
            .data
            .as_ref()
            .map_or_else(|| Value::Object(Map::new()), json::from_proto);

        Ok(Self {
            id: wire.id,
            parent_id: wire.parent_id,
            ts: wire.ts,
            room_id: wire.room_id,
            from: wire.from,
            syscall: wire.syscall,
            status,
            data,
            payload: wire.payload,
        })
    }
}
