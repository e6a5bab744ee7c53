use super::*;
use crate::{Frame, decode_frame, encode_frame};

#[test]
fn role_parse_defaults_to_guest() {
    assert_eq!(Role::parse("host"), Role::Host);
    assert_eq!(Role::parse("HOST"), Role::Host);
    assert_eq!(Role::parse("guest"), Role::Guest);
    assert_eq!(Role::parse(""), Role::Guest);
    assert_eq!(Role::Host.as_str(), "host");
}

#[test]
fn playback_state_uses_camel_case_keys() {
    let state = PlaybackState { is_playing: true, position: 12.5, observed_at: 1_000 };
    let value = state.to_value();
    assert_eq!(value["isPlaying"], serde_json::json!(true));
    assert_eq!(value["observedAt"], serde_json::json!(1_000));
}

#[test]
fn playback_state_survives_the_wire_codec() {
    let state = PlaybackState { is_playing: false, position: 10.0, observed_at: 1_700_000_000_000 };
    let frame = Frame::request("s-1", ROOM_STATE, serde_json::json!({"state": state.to_value()}));

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    let restored = PlaybackState::from_value(&decoded.data["state"]).expect("state");
    assert_eq!(restored, state);
}

#[test]
fn join_reply_defaults_missing_stream_to_inactive() {
    let value = serde_json::json!({"roomId": "r", "role": "guest", "hasHost": false});
    let reply = JoinReply::from_value(&value).expect("reply");
    assert_eq!(reply.stream, StreamState::inactive());
    assert!(reply.state.is_none());
    assert!(!reply.has_host);
}

#[test]
fn stream_state_constructors() {
    let active = StreamState::active("audio/webm;codecs=opus");
    assert!(active.active);
    assert_eq!(active.mime_type.as_deref(), Some("audio/webm;codecs=opus"));
    assert!(!StreamState::inactive().active);
}
