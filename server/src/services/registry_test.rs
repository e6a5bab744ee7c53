use super::*;
use crate::frame::Data;
use crate::state::HostSlot;
use crate::state::test_helpers::{T0, connection};
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

fn playback(position: f64) -> PlaybackState {
    PlaybackState { is_playing: true, position, observed_at: T0 }
}

async fn recv(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("outbox receive timed out")
        .expect("outbox closed unexpectedly")
}

// =============================================================================
// JOIN
// =============================================================================

#[test]
fn first_join_creates_room() {
    let mut reg = RoomRegistry::new();
    let (guest, tx, _rx) = connection();

    let snap = reg.join(guest, "den", Role::Guest, tx).unwrap();
    assert_eq!(snap.room_key, "den");
    assert!(!snap.has_host);
    assert!(snap.playback.is_none());
    assert!(!snap.stream.active);
    assert_eq!(reg.room_count(), 1);
    assert_eq!(reg.host_count("den"), 0);
    reg.check_invariants().unwrap();
}

#[test]
fn blank_room_key_is_rejected() {
    let mut reg = RoomRegistry::new();
    let (conn, tx, _rx) = connection();
    assert_eq!(reg.join(conn, "   ", Role::Host, tx), Err(Rejection::MissingRoomKey));
    assert_eq!(reg.room_count(), 0);
}

#[test]
fn room_key_is_trimmed() {
    let mut reg = RoomRegistry::new();
    let (conn, tx, _rx) = connection();
    let snap = reg.join(conn, "  den ", Role::Guest, tx).unwrap();
    assert_eq!(snap.room_key, "den");
    assert!(reg.room("den").is_some());
}

#[test]
fn second_join_on_same_connection_is_rejected() {
    let mut reg = RoomRegistry::new();
    let (conn, tx, _rx) = connection();
    reg.join(conn, "den", Role::Guest, tx.clone()).unwrap();
    assert_eq!(reg.join(conn, "attic", Role::Host, tx), Err(Rejection::AlreadyJoined));
    assert_eq!(reg.room_count(), 1);
    assert_eq!(reg.membership(conn).unwrap().room_key, "den");
}

#[test]
fn host_join_claims_slot_and_guest_sees_it() {
    let mut reg = RoomRegistry::new();
    let (host, host_tx, _h) = connection();
    let (guest, guest_tx, _g) = connection();

    let snap = reg.join(host, "den", Role::Host, host_tx).unwrap();
    assert!(snap.has_host);
    assert_eq!(reg.room("den").unwrap().state.host, HostSlot::Hosted(host));

    let snap = reg.join(guest, "den", Role::Guest, guest_tx).unwrap();
    assert!(snap.has_host);
    assert_eq!(snap.reply().role, Role::Guest);
    reg.check_invariants().unwrap();
}

#[test]
fn join_reply_carries_current_playback_and_stream() {
    let mut reg = RoomRegistry::new();
    let (host, host_tx, _h) = connection();
    let (guest, guest_tx, _g) = connection();
    reg.join(host, "den", Role::Host, host_tx).unwrap();
    reg.apply(host, "den", Command::UpdatePlayback(playback(4.0))).unwrap();
    reg.apply(host, "den", Command::StartStream { mime_type: "audio/webm".into() })
        .unwrap();

    let reply = reg.join(guest, "den", Role::Guest, guest_tx).unwrap().reply();
    assert_eq!(reply.state, Some(playback(4.0)));
    assert_eq!(reply.stream, StreamState::active("audio/webm"));
}

#[test]
fn host_handover_resets_active_stream() {
    let mut reg = RoomRegistry::new();
    let (old, old_tx, _o) = connection();
    let (new, new_tx, _n) = connection();
    reg.join(old, "den", Role::Host, old_tx).unwrap();
    reg.apply(old, "den", Command::StartStream { mime_type: "audio/webm".into() })
        .unwrap();

    let snap = reg.join(new, "den", Role::Host, new_tx).unwrap();
    assert_eq!(snap.handover, Some(Effect::StreamStopped));
    assert!(!snap.stream.active);
    assert_eq!(reg.host_count("den"), 1);

    // Former host can no longer mutate.
    assert_eq!(reg.apply(old, "den", Command::StopStream), Err(Rejection::NotHost));
    // And its departure leaves the new host in place.
    let departure = reg.leave(old).unwrap();
    assert!(!departure.released_host);
    assert_eq!(reg.room("den").unwrap().state.host, HostSlot::Hosted(new));
    reg.check_invariants().unwrap();
}

// =============================================================================
// APPLY / PLAYBACK
// =============================================================================

#[test]
fn apply_requires_membership_of_that_room() {
    let mut reg = RoomRegistry::new();
    let (host, host_tx, _h) = connection();
    let (other, other_tx, _o) = connection();
    reg.join(host, "den", Role::Host, host_tx).unwrap();
    reg.join(other, "attic", Role::Host, other_tx).unwrap();

    assert_eq!(reg.apply(other, "den", Command::StopStream), Err(Rejection::NotMember));
    assert_eq!(
        reg.apply(host, "cellar", Command::StopStream),
        Err(Rejection::UnknownRoom("cellar".into()))
    );
    assert_eq!(reg.apply(host, "", Command::StopStream), Err(Rejection::MissingRoomKey));
}

#[test]
fn guest_update_changes_nothing() {
    let mut reg = RoomRegistry::new();
    let (host, host_tx, _h) = connection();
    let (guest, guest_tx, _g) = connection();
    reg.join(host, "den", Role::Host, host_tx).unwrap();
    reg.join(guest, "den", Role::Guest, guest_tx).unwrap();

    assert_eq!(
        reg.apply(guest, "den", Command::UpdatePlayback(playback(9.0))),
        Err(Rejection::NotHost)
    );
    assert_eq!(
        reg.apply(guest, "den", Command::StartStream { mime_type: "audio/webm".into() }),
        Err(Rejection::NotHost)
    );
    let state = &reg.room("den").unwrap().state;
    assert!(state.playback.is_none());
    assert!(!state.stream.active);
}

#[test]
fn playback_lookup() {
    let mut reg = RoomRegistry::new();
    let (host, host_tx, _h) = connection();
    let (stranger, ..) = connection();
    reg.join(host, "den", Role::Host, host_tx).unwrap();

    assert_eq!(reg.playback(host, "den"), Err(Rejection::NoPlaybackState));
    reg.apply(host, "den", Command::UpdatePlayback(playback(1.5))).unwrap();
    assert_eq!(reg.playback(host, "den"), Ok(playback(1.5)));
    assert_eq!(reg.playback(stranger, "den"), Err(Rejection::NotMember));
}

// =============================================================================
// LEAVE / COLLECT
// =============================================================================

#[test]
fn host_departure_releases_slot_and_stream_once() {
    let mut reg = RoomRegistry::new();
    let (host, host_tx, _h) = connection();
    let (guest, guest_tx, _g) = connection();
    reg.join(host, "den", Role::Host, host_tx).unwrap();
    reg.join(guest, "den", Role::Guest, guest_tx).unwrap();
    reg.apply(host, "den", Command::StartStream { mime_type: "audio/webm".into() })
        .unwrap();

    let departure = reg.leave(host).unwrap();
    assert!(departure.released_host);
    assert!(!departure.room_removed);
    assert_eq!(departure.remaining, 1);

    let state = &reg.room("den").unwrap().state;
    assert_eq!(state.host, HostSlot::Unowned);
    assert_eq!(state.stream, StreamState::inactive());

    // A second leave for the same connection is a no-op.
    assert!(reg.leave(host).is_none());
    reg.check_invariants().unwrap();
}

#[test]
fn last_member_leaving_removes_room() {
    let mut reg = RoomRegistry::new();
    let (guest, tx, _rx) = connection();
    reg.join(guest, "den", Role::Guest, tx).unwrap();

    let departure = reg.leave(guest).unwrap();
    assert!(departure.room_removed);
    assert_eq!(departure.remaining, 0);
    assert_eq!(reg.room_count(), 0);
    reg.check_invariants().unwrap();
}

#[test]
fn repeated_join_leave_cycles_do_not_leak_rooms() {
    let mut reg = RoomRegistry::new();
    for i in 0..50 {
        let (host, host_tx, _h) = connection();
        let (guest, guest_tx, _g) = connection();
        let key = format!("room-{}", i % 5);
        reg.join(host, &key, Role::Host, host_tx).unwrap();
        reg.join(guest, &key, Role::Guest, guest_tx).unwrap();
        reg.check_invariants().unwrap();
        reg.leave(guest).unwrap();
        reg.leave(host).unwrap();
        reg.check_invariants().unwrap();
    }
    assert_eq!(reg.room_count(), 0);
    assert!(reg.connections.is_empty());
}

#[test]
fn collect_refuses_occupied_room() {
    let mut reg = RoomRegistry::new();
    let (guest, tx, _rx) = connection();
    reg.join(guest, "den", Role::Guest, tx).unwrap();
    assert_eq!(reg.collect_if_empty("den"), Collection::Retained { members: 1 });
    assert_eq!(reg.collect_if_empty("nowhere"), Collection::Missing);
    assert_eq!(reg.room_count(), 1);
}

#[test]
fn invariants_catch_empty_room() {
    let mut reg = RoomRegistry::new();
    reg.rooms.insert("ghost".into(), Room::default());
    assert_eq!(reg.check_invariants(), Err(InvariantViolation::EmptyRoom("ghost".into())));
}

// =============================================================================
// FAN-OUT
// =============================================================================

#[tokio::test]
async fn fan_out_excludes_sender_and_preserves_order() {
    let mut reg = RoomRegistry::new();
    let (host, host_tx, mut host_rx) = connection();
    let (guest, guest_tx, mut guest_rx) = connection();
    reg.join(host, "den", Role::Host, host_tx).unwrap();
    reg.join(guest, "den", Role::Guest, guest_tx).unwrap();

    for seq in 0..3 {
        let frame = Frame::request("stream:chunk", Data::new())
            .with_room_id("den")
            .with_payload(Some(vec![seq]));
        assert_eq!(reg.fan_out("den", &frame, Some(host)), 1);
    }

    for seq in 0..3 {
        let frame = recv(&mut guest_rx).await;
        assert_eq!(frame.payload, Some(vec![seq]));
    }
    assert!(host_rx.try_recv().is_err());
}

fn slow_connection() -> (ConnectionId, Outbox, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(1);
    (uuid::Uuid::new_v4(), tx, rx)
}

#[test]
fn full_outbox_drops_chunks_but_keeps_member() {
    let mut reg = RoomRegistry::new();
    let (slow, slow_tx, _slow_rx) = slow_connection();
    let (fast, fast_tx, _fast_rx) = connection();
    reg.join(slow, "den", Role::Guest, slow_tx).unwrap();
    reg.join(fast, "den", Role::Guest, fast_tx).unwrap();

    let chunk = Frame::request("stream:chunk", Data::new()).with_payload(Some(vec![1]));
    assert_eq!(reg.fan_out("den", &chunk, None), 2);
    assert_eq!(reg.fan_out("den", &chunk, None), 1);
    assert!(reg.rooms["den"].members.contains_key(&slow));
    assert_eq!(reg.fan_out("nowhere", &chunk, None), 0);
    reg.check_invariants().unwrap();
}

#[test]
fn full_outbox_on_control_frame_evicts_member() {
    let mut reg = RoomRegistry::new();
    let (slow, slow_tx, mut slow_rx) = slow_connection();
    let (fast, fast_tx, mut fast_rx) = connection();
    reg.join(slow, "den", Role::Guest, slow_tx).unwrap();
    reg.join(fast, "den", Role::Guest, fast_tx).unwrap();

    let chunk = Frame::request("stream:chunk", Data::new()).with_payload(Some(vec![1]));
    let stop = Frame::request("stream:stop", Data::new());
    assert_eq!(reg.fan_out("den", &chunk, None), 2);
    assert_eq!(reg.fan_out("den", &stop, None), 1);

    assert!(!reg.rooms["den"].members.contains_key(&slow));
    assert!(reg.connections.get(&slow).is_none());
    reg.check_invariants().unwrap();

    // The queued chunk drains, then the outbox reports closed.
    assert_eq!(slow_rx.try_recv().unwrap().syscall, "stream:chunk");
    assert!(matches!(slow_rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));

    assert_eq!(fast_rx.try_recv().unwrap().syscall, "stream:chunk");
    assert_eq!(fast_rx.try_recv().unwrap().syscall, "stream:stop");
}

#[test]
fn evicted_host_stops_stream_for_the_rest() {
    let mut reg = RoomRegistry::new();
    let (host, host_tx, _host_rx) = slow_connection();
    let (guest, guest_tx, mut guest_rx) = connection();
    reg.join(host, "den", Role::Host, host_tx).unwrap();
    reg.join(guest, "den", Role::Guest, guest_tx).unwrap();
    reg.apply(host, "den", Command::StartStream { mime_type: "audio/webm".into() }).unwrap();

    let state = Frame::request("room:state", Data::new());
    assert_eq!(reg.fan_out("den", &state, Some(guest)), 1);
    assert_eq!(reg.fan_out("den", &state, Some(guest)), 0);

    assert_eq!(reg.host_count("den"), 0);
    assert!(!reg.rooms["den"].state.stream.active);
    assert_eq!(guest_rx.try_recv().unwrap().syscall, "stream:stop");
    assert!(guest_rx.try_recv().is_err());
    reg.check_invariants().unwrap();
}

#[test]
fn depart_of_guest_sends_nothing() {
    let mut reg = RoomRegistry::new();
    let (host, host_tx, mut host_rx) = connection();
    let (guest, guest_tx, _guest_rx) = connection();
    reg.join(host, "den", Role::Host, host_tx).unwrap();
    reg.join(guest, "den", Role::Guest, guest_tx).unwrap();

    let departure = reg.depart(guest).unwrap();
    assert!(!departure.released_host);
    assert_eq!(departure.remaining, 1);
    assert!(host_rx.try_recv().is_err());
    assert!(reg.depart(guest).is_none());
}
