use super::*;

#[test]
fn request_sets_fields() {
    let frame = Frame::request("room:join", Data::new());
    assert_eq!(frame.syscall, "room:join");
    assert_eq!(frame.status, Status::Request);
    assert!(frame.parent_id.is_none());
    assert!(frame.room_id.is_none());
    assert!(frame.ts > 0);
}

#[test]
fn done_with_inherits_context() {
    let req = Frame::request("room:join", Data::new()).with_room_id("den");
    let mut data = Data::new();
    data.insert("hasHost".into(), serde_json::json!(true));
    let done = req.done_with(data);

    assert_eq!(done.parent_id, Some(req.id));
    assert_eq!(done.room_id.as_deref(), Some("den"));
    assert_eq!(done.syscall, "room:join");
    assert_eq!(done.status, Status::Done);
    assert_eq!(done.data.get("hasHost"), Some(&serde_json::json!(true)));
}

#[test]
fn prefix_and_op_extraction() {
    let frame = Frame::request("host:stream:start", Data::new());
    assert_eq!(frame.prefix(), "host");
    assert_eq!(frame.op(), "stream:start");

    let frame = Frame::request("noseparator", Data::new());
    assert_eq!(frame.prefix(), "noseparator");
    assert_eq!(frame.op(), "");
}

#[test]
fn room_key_prefers_header_over_data() {
    let frame = Frame::request("room:join", Data::new())
        .with_room_id("header")
        .with_data("roomId", "body");
    assert_eq!(frame.room_key(), Some("header"));

    let frame = Frame::request("room:join", Data::new()).with_data("roomId", "body");
    assert_eq!(frame.room_key(), Some("body"));

    let frame = Frame::request("room:join", Data::new());
    assert_eq!(frame.room_key(), None);
}

#[test]
fn wire_conversion_round_trips() {
    let original = Frame::request("stream:chunk", Data::new())
        .with_room_id("den")
        .with_data("seq", 3)
        .with_payload(Some(vec![1, 2, 3]));

    let wire = frames::Frame::from(&original);
    let bytes = frames::encode_frame(&wire);
    let restored = Frame::try_from(frames::decode_frame(&bytes).expect("decode")).expect("convert");

    assert_eq!(restored.id, original.id);
    assert_eq!(restored.room_id.as_deref(), Some("den"));
    assert_eq!(restored.payload.as_deref(), Some(&[1_u8, 2, 3][..]));
    assert_eq!(restored.data.get("seq").and_then(serde_json::Value::as_i64), Some(3));
}

#[test]
fn wire_conversion_rejects_non_uuid_id() {
    let wire = frames::Frame::request("not-a-uuid", "room:join", serde_json::json!({}));
    let err = Frame::try_from(wire).unwrap_err();
    assert_eq!(err, FrameError::InvalidId("not-a-uuid".into()));
}

#[test]
fn wire_conversion_drops_non_object_data_and_empty_room() {
    let mut wire = frames::Frame::request(Uuid::new_v4().to_string(), "clock:time", serde_json::json!([1, 2]));
    wire.room_id = Some(String::new());
    let frame = Frame::try_from(wire).expect("convert");
    assert!(frame.data.is_empty());
    assert!(frame.room_id.is_none());
}
