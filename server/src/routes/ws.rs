//! WebSocket handler: room protocol gateway.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection ID and enters a `select!` loop:
//! - Incoming binary frames → decode + dispatch by syscall prefix
//! - Frames queued on the connection's outbox by room peers → forward
//!
//! Handler functions validate, mutate the registry, and return an
//! `Outcome`. The dispatch layer owns all outbound concerns: reply to the
//! sender and fan-out to peers. Fan-out happens while the registry write
//! lock is still held, so every member sees room events in the order the
//! registry applied them.
//!
//! ERRORS
//! ======
//! Undecodable frames and rejected events are logged and dropped. Nothing
//! is sent back, so a caller cannot probe which rooms exist or who hosts.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `connection_id`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (reply / broadcast / both)
//! 4. Close or eviction → leave room → `stream:stop` to peers if the host left

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use frames::protocol::{
    CLOCK_TIME, HOST_STATE, HOST_STREAM_START, HOST_STREAM_STOP, ROOM_JOIN, ROOM_STATE, ROOM_STATE_GET,
    SESSION_CONNECTED, STREAM_CHUNK, STREAM_START, STREAM_STOP, Role,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, Frame, Status};
use crate::services::registry::JoinSnapshot;
use crate::services::session::{self, Command, Effect, Rejection};
use crate::state::{AppState, ConnectionId, RoomRegistry};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what; handlers never send frames directly.
#[derive(Debug)]
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Fan a push frame out to every room peer EXCLUDING sender. No reply.
    Broadcast(Frame),
    /// Reply to sender, and fan a push frame out to its peers.
    ReplyAndBroadcast { reply: Data, broadcast: Frame },
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();

    // Per-connection channel for frames fanned out by room peers. Once the
    // connection has joined, the registry holds the only strong sender, so
    // an eviction closes the channel and ends this loop.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.outbox_capacity);
    let weak_tx = client_tx.downgrade();
    let mut client_tx = Some(client_tx);

    let welcome = Frame::request(SESSION_CONNECTED, Data::new()).with_data("connection_id", connection_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%connection_id, "ws: client connected");

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Binary(bytes) => {
                        let Some(tx) = client_tx.clone().or_else(|| weak_tx.upgrade()) else {
                            break;
                        };
                        let replies = process_inbound_bytes(&state, connection_id, &tx, &bytes).await;
                        drop(tx);
                        if replies.iter().any(|f| f.syscall == ROOM_JOIN && f.status == Status::Done) {
                            client_tx = None;
                        }
                        for frame in replies {
                            if send_frame(&mut socket, &frame).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    Message::Text(_) => {
                        warn!(%connection_id, "ws: text message ignored, frames are binary");
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            frame = client_rx.recv() => {
                let Some(frame) = frame else {
                    info!(%connection_id, "ws: outbox closed, dropping connection");
                    break;
                };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    disconnect(&state, connection_id).await;
    info!(%connection_id, "ws: client disconnected");
}

/// Drop the connection from its room. A departing host ends the stream for
/// everyone left behind.
async fn disconnect(state: &AppState, connection_id: ConnectionId) {
    let mut rooms = state.rooms.write().await;
    let Some(departure) = rooms.depart(connection_id) else {
        return;
    };

    info!(
        %connection_id,
        room = %departure.room_key,
        role = departure.role.as_str(),
        remaining = departure.remaining,
        removed = departure.room_removed,
        "ws: client left room"
    );
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode and process one inbound binary frame and return frames for the
/// sender.
///
/// Keeps the websocket transport separate from frame handling so tests can
/// drive the protocol without sockets.
pub(crate) async fn process_inbound_bytes(
    state: &AppState,
    connection_id: ConnectionId,
    client_tx: &mpsc::Sender<Frame>,
    bytes: &[u8],
) -> Vec<Frame> {
    let wire = match frames::decode_frame(bytes) {
        Ok(w) => w,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound frame");
            return Vec::new();
        }
    };
    let mut req = match Frame::try_from(wire) {
        Ok(f) => f,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound frame");
            return Vec::new();
        }
    };

    req.from = Some(connection_id.to_string());

    if req.syscall == STREAM_CHUNK {
        debug!(%connection_id, id = %req.id, bytes = req.payload.as_ref().map_or(0, Vec::len), "ws: recv chunk");
    } else {
        info!(%connection_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    if req.syscall == CLOCK_TIME {
        let mut data = Data::new();
        data.insert("now".into(), serde_json::json!(state.now_ms()));
        return vec![req.done_with(data)];
    }

    // Everything else reads or mutates rooms. Hold the lock through fan-out.
    let mut rooms = state.rooms.write().await;
    let now_ms = state.now_ms();

    let result = match req.prefix() {
        "room" => handle_room(&mut rooms, connection_id, client_tx, &req),
        "host" => handle_host(&mut rooms, connection_id, now_ms, &req),
        "stream" => handle_stream(&mut rooms, connection_id, &req),
        _ => Err(Rejection::UnknownOp(req.syscall.clone())),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Broadcast(frame)) => {
            broadcast(&mut rooms, connection_id, &frame);
            Vec::new()
        }
        Ok(Outcome::ReplyAndBroadcast { reply, broadcast: frame }) => {
            broadcast(&mut rooms, connection_id, &frame);
            vec![req.done_with(reply)]
        }
        Err(rejection) => {
            debug!(
                %connection_id,
                syscall = %req.syscall,
                code = rejection.error_code(),
                reason = %rejection,
                "ws: frame rejected"
            );
            Vec::new()
        }
    }
}

fn broadcast(rooms: &mut RoomRegistry, connection_id: ConnectionId, frame: &Frame) {
    let Some(room_key) = frame.room_id.as_deref() else {
        return;
    };
    rooms.fan_out(room_key, frame, Some(connection_id));
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

fn handle_room(
    rooms: &mut RoomRegistry,
    connection_id: ConnectionId,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Rejection> {
    match req.syscall.as_str() {
        ROOM_JOIN => {
            let room_key = req.room_key().ok_or(Rejection::MissingRoomKey)?;
            let role = req
                .data
                .get("role")
                .and_then(|v| v.as_str())
                .map_or(Role::Guest, Role::parse);

            let snapshot = rooms.join(connection_id, room_key, role, client_tx.clone())?;
            info!(%connection_id, room = %snapshot.room_key, role = role.as_str(), has_host = snapshot.has_host, "ws: client joined room");

            let reply = join_reply_data(&snapshot);
            match snapshot.handover {
                Some(effect) => Ok(Outcome::ReplyAndBroadcast { reply, broadcast: effect_frame(&snapshot.room_key, effect, req) }),
                None => Ok(Outcome::Reply(reply)),
            }
        }
        ROOM_STATE_GET => {
            let room_key = req.room_key().ok_or(Rejection::MissingRoomKey)?;
            let playback = rooms.playback(connection_id, room_key)?;
            let mut data = Data::new();
            data.insert("state".into(), playback.to_value());
            Ok(Outcome::Reply(data))
        }
        other => Err(Rejection::UnknownOp(other.to_owned())),
    }
}

// =============================================================================
// HOST HANDLERS
// =============================================================================

fn handle_host(
    rooms: &mut RoomRegistry,
    connection_id: ConnectionId,
    now_ms: i64,
    req: &Frame,
) -> Result<Outcome, Rejection> {
    let room_key = req.room_key().ok_or(Rejection::MissingRoomKey)?.trim().to_owned();

    let command = match req.syscall.as_str() {
        HOST_STATE => {
            let raw = req.data.get("state").cloned().unwrap_or_default();
            Command::UpdatePlayback(session::coerce_playback(&raw, now_ms))
        }
        HOST_STREAM_START => {
            let mime_type = req
                .data
                .get("mimeType")
                .and_then(|v| v.as_str())
                .ok_or(Rejection::MissingMimeType)?;
            Command::StartStream { mime_type: mime_type.to_owned() }
        }
        HOST_STREAM_STOP => Command::StopStream,
        other => return Err(Rejection::UnknownOp(other.to_owned())),
    };

    let effect = rooms.apply(connection_id, &room_key, command)?;
    info!(%connection_id, room = %room_key, op = req.op(), "ws: host event applied");
    Ok(Outcome::Broadcast(effect_frame(&room_key, effect, req)))
}

// =============================================================================
// STREAM HANDLERS
// =============================================================================

fn handle_stream(rooms: &mut RoomRegistry, connection_id: ConnectionId, req: &Frame) -> Result<Outcome, Rejection> {
    if req.syscall != STREAM_CHUNK {
        return Err(Rejection::UnknownOp(req.syscall.clone()));
    }
    let room_key = req.room_key().ok_or(Rejection::MissingRoomKey)?.trim().to_owned();
    let effect = rooms.apply(connection_id, &room_key, Command::RelayChunk)?;
    Ok(Outcome::Broadcast(effect_frame(&room_key, effect, req)))
}

// =============================================================================
// HELPERS
// =============================================================================

/// Build the push frame peers receive for an applied effect.
fn effect_frame(room_key: &str, effect: Effect, req: &Frame) -> Frame {
    let frame = match effect {
        Effect::PlaybackChanged(playback) => {
            Frame::request(ROOM_STATE, Data::new()).with_data("state", playback.to_value())
        }
        Effect::StreamStarted { mime_type } => Frame::request(STREAM_START, Data::new()).with_data("mimeType", mime_type),
        Effect::ChunkRelayed => {
            // Relayed unmodified: same data, same bytes.
            let mut data = req.data.clone();
            data.remove("roomId");
            Frame::request(STREAM_CHUNK, data).with_payload(req.payload.clone())
        }
        Effect::StreamStopped => Frame::request(STREAM_STOP, Data::new()),
    };
    frame.with_room_id(room_key)
}

fn join_reply_data(snapshot: &JoinSnapshot) -> Data {
    match snapshot.reply().to_value() {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => Data::new(),
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    if frame.syscall == STREAM_CHUNK {
        debug!(id = %frame.id, "ws: send chunk");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    let bytes = frames::encode_frame(&frames::Frame::from(frame));
    socket.send(Message::Binary(bytes.into())).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
