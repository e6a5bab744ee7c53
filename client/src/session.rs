//! Room session over a websocket.
//!
//! ARCHITECTURE
//! ============
//! `RoomClient::connect` opens the socket, waits for `session:connected`,
//! then splits it between two tasks:
//! - writer: drains an unbounded frame channel into the socket
//! - reader: resolves pending requests by `parent_id` and forwards room
//!   pushes as `RoomEvent`s
//!
//! Requests are single-resolution: one oneshot per request id, an explicit
//! deadline, and a typed result. The server drops rejected requests without
//! replying, so a rejection surfaces here as a timeout.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use frames::protocol::{
    CLOCK_TIME, HOST_STATE, HOST_STREAM_START, HOST_STREAM_STOP, JoinReply, PlaybackState, ROOM_JOIN, ROOM_STATE,
    ROOM_STATE_GET, Role, SESSION_CONNECTED, STREAM_CHUNK, STREAM_START, STREAM_STOP,
};
use frames::{Frame, Status};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::clock::TimeSource;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::relay::normalize_chunk;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Frame>>>>;

/// Room push delivered to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    RoomState(PlaybackState),
    StreamStart { mime_type: String },
    Chunk(Vec<u8>),
    StreamStop,
}

/// Connected room session.
pub struct RoomClient {
    outgoing: mpsc::UnboundedSender<Frame>,
    pending: Pending,
    connection_id: String,
    room_id: OnceLock<String>,
    config: ClientConfig,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RoomClient {
    /// Connect to `/api/ws` under `base_url` and wait for the welcome frame.
    ///
    /// # Errors
    ///
    /// URL conversion, handshake, or welcome timeout failures.
    pub async fn connect(
        base_url: &str,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RoomEvent>), ClientError> {
        let url = ws_url(base_url)?;
        let (mut socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::WsConnect(Box::new(e)))?;

        let welcome = tokio::time::timeout(config.request_timeout, wait_connected(&mut socket))
            .await
            .map_err(|_| ClientError::Timeout(SESSION_CONNECTED.to_owned()))??;
        let connection_id = welcome
            .data
            .get("connection_id")
            .and_then(serde_json::Value::as_str)
            .ok_or(ClientError::MissingField("connection_id"))?
            .to_owned();
        info!(%connection_id, %url, "session: connected");

        let (sink, stream) = socket.split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(write_loop(sink, outgoing_rx));
        let reader = tokio::spawn(read_loop(stream, pending.clone(), events_tx));

        let client = Self { outgoing, pending, connection_id, room_id: OnceLock::new(), config, reader, writer };
        Ok((client, events_rx))
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Room joined by this session, once `join` succeeded.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.get().map(String::as_str)
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // =========================================================================
    // TRANSPORT
    // =========================================================================

    /// Queue a frame without waiting for a reply.
    ///
    /// # Errors
    ///
    /// `WsClosed` once the writer has gone away.
    pub fn send(&self, frame: Frame) -> Result<(), ClientError> {
        self.outgoing.send(frame).map_err(|_| ClientError::WsClosed)
    }

    /// Send a request and wait for its terminal reply.
    ///
    /// # Errors
    ///
    /// `Timeout` after `deadline`, `WsClosed` if the socket dies first,
    /// `ServerError` for an error-status reply.
    pub async fn request(&self, frame: Frame, deadline: Duration) -> Result<Frame, ClientError> {
        let id = frame.id.clone();
        let syscall = frame.syscall.clone();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.send(frame) {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(reply)) if reply.status == Status::Error => Err(ClientError::ServerError {
                message: reply.error_message().unwrap_or("request failed").to_owned(),
                syscall,
            }),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::WsClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ClientError::Timeout(syscall))
            }
        }
    }

    // =========================================================================
    // ROOM
    // =========================================================================

    /// Join `room_id` with `role`.
    ///
    /// # Errors
    ///
    /// Transport errors, or a timeout if the server dropped the join.
    pub async fn join(&self, room_id: &str, role: Role) -> Result<JoinReply, ClientError> {
        let frame = new_frame(ROOM_JOIN, json!({"role": role.as_str()})).with_room_id(room_id);
        let reply = self.request(frame, self.config.request_timeout).await?;
        let joined = JoinReply::from_value(&reply.data).ok_or(ClientError::MissingField("roomId"))?;
        let _ = self.room_id.set(joined.room_id.clone());
        info!(room = %joined.room_id, role = role.as_str(), has_host = joined.has_host, "session: joined room");
        Ok(joined)
    }

    /// Server clock in epoch milliseconds.
    ///
    /// # Errors
    ///
    /// Transport errors, or `MissingField` for a malformed reply.
    pub async fn server_time(&self) -> Result<i64, ClientError> {
        let reply = self
            .request(new_frame(CLOCK_TIME, json!({})), self.config.request_timeout)
            .await?;
        reply
            .data
            .get("now")
            .and_then(json_i64)
            .ok_or(ClientError::MissingField("now"))
    }

    /// Current room playback state. `None` when the room has none yet.
    ///
    /// # Errors
    ///
    /// `NotJoined` before a successful join, or transport errors.
    pub async fn room_state(&self, deadline: Duration) -> Result<Option<PlaybackState>, ClientError> {
        let frame = new_frame(ROOM_STATE_GET, json!({})).with_room_id(self.joined_room()?);
        match self.request(frame, deadline).await {
            Ok(reply) => Ok(reply.data.get("state").and_then(PlaybackState::from_value)),
            Err(ClientError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // HOST
    // =========================================================================

    /// Publish the host's transport state.
    ///
    /// # Errors
    ///
    /// `NotJoined` or `WsClosed`.
    pub fn send_host_state(&self, state: &PlaybackState) -> Result<(), ClientError> {
        let data = json!({"state": {"isPlaying": state.is_playing, "position": state.position, "at": state.observed_at}});
        self.send(new_frame(HOST_STATE, data).with_room_id(self.joined_room()?))
    }

    /// Announce a stream and its encoding.
    ///
    /// # Errors
    ///
    /// `NotJoined` or `WsClosed`.
    pub fn start_stream(&self, mime_type: &str) -> Result<(), ClientError> {
        self.send(new_frame(HOST_STREAM_START, json!({"mimeType": mime_type})).with_room_id(self.joined_room()?))
    }

    /// Ship one audio fragment.
    ///
    /// # Errors
    ///
    /// `NotJoined` or `WsClosed`.
    pub fn send_chunk(&self, chunk: Vec<u8>) -> Result<(), ClientError> {
        self.send(
            new_frame(STREAM_CHUNK, json!({}))
                .with_room_id(self.joined_room()?)
                .with_payload(chunk),
        )
    }

    /// End the stream.
    ///
    /// # Errors
    ///
    /// `NotJoined` or `WsClosed`.
    pub fn stop_stream(&self) -> Result<(), ClientError> {
        self.send(new_frame(HOST_STREAM_STOP, json!({})).with_room_id(self.joined_room()?))
    }

    fn joined_room(&self) -> Result<&str, ClientError> {
        self.room_id().ok_or(ClientError::NotJoined)
    }
}

impl Drop for RoomClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait::async_trait]
impl TimeSource for RoomClient {
    async fn server_time(&self) -> Result<i64, ClientError> {
        RoomClient::server_time(self).await
    }
}

// =============================================================================
// TASKS
// =============================================================================

async fn wait_connected(socket: &mut Socket) -> Result<Frame, ClientError> {
    loop {
        let Some(msg) = socket.next().await else {
            return Err(ClientError::WsClosed);
        };
        match msg.map_err(|e| ClientError::WsConnect(Box::new(e)))? {
            Message::Binary(bytes) => {
                let frame = frames::decode_frame(&bytes)?;
                if frame.syscall == SESSION_CONNECTED {
                    return Ok(frame);
                }
            }
            Message::Close(_) => return Err(ClientError::WsClosed),
            _ => {}
        }
    }
}

async fn write_loop(mut sink: SplitSink<Socket, Message>, mut outgoing: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = outgoing.recv().await {
        let bytes = frames::encode_frame(&frame);
        if let Err(e) = sink.send(Message::Binary(bytes.into())).await {
            warn!(error = %e, "session: send failed");
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<Socket>, pending: Pending, events: mpsc::UnboundedSender<RoomEvent>) {
    while let Some(msg) = stream.next().await {
        let bytes = match msg {
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "session: recv failed");
                break;
            }
        };
        let frame = match frames::decode_frame(&bytes) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "session: undecodable frame");
                continue;
            }
        };

        if let Some(parent_id) = frame.parent_id.as_deref() {
            if frame.status.is_terminal() {
                if let Some(tx) = pending.lock().await.remove(parent_id) {
                    let _ = tx.send(frame);
                }
            }
            continue;
        }

        if let Some(event) = to_event(&frame) {
            if events.send(event).is_err() {
                debug!("session: event receiver dropped");
            }
        }
    }

    // Wake outstanding requests with `WsClosed`.
    pending.lock().await.clear();
    info!("session: disconnected");
}

// =============================================================================
// HELPERS
// =============================================================================

/// Map a server push to a room event. Unknown pushes are ignored.
#[must_use]
pub fn to_event(frame: &Frame) -> Option<RoomEvent> {
    match frame.syscall.as_str() {
        ROOM_STATE => frame
            .data
            .get("state")
            .and_then(PlaybackState::from_value)
            .map(RoomEvent::RoomState),
        STREAM_START => frame
            .data
            .get("mimeType")
            .and_then(serde_json::Value::as_str)
            .map(|m| RoomEvent::StreamStart { mime_type: m.to_owned() }),
        STREAM_CHUNK => normalize_chunk(frame).map(RoomEvent::Chunk),
        STREAM_STOP => Some(RoomEvent::StreamStop),
        _ => None,
    }
}

fn new_frame(syscall: &str, data: serde_json::Value) -> Frame {
    Frame::request(uuid::Uuid::new_v4().to_string(), syscall, data)
}

#[allow(clippy::cast_possible_truncation)]
fn json_i64(value: &serde_json::Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f.round() as i64))
}

/// Convert an HTTP or websocket base URL into the `/api/ws` endpoint.
///
/// # Errors
///
/// `InvalidUrl` for any other scheme.
pub fn ws_url(base_url: &str) -> Result<String, ClientError> {
    let trimmed = base_url.trim().trim_end_matches('/');

    let (scheme, rest) = if let Some(rest) = trimmed.strip_prefix("http://") {
        ("ws", rest)
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = trimmed.strip_prefix("ws://") {
        ("ws", rest)
    } else if let Some(rest) = trimmed.strip_prefix("wss://") {
        ("wss", rest)
    } else {
        return Err(ClientError::InvalidUrl(base_url.to_owned()));
    };

    if rest.is_empty() {
        return Err(ClientError::InvalidUrl(base_url.to_owned()));
    }
    let rest = rest.strip_suffix("/api/ws").unwrap_or(rest);
    Ok(format!("{scheme}://{rest}/api/ws"))
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
