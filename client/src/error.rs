/// Error type for room client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server URL could not be converted to a WebSocket URL.
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
    /// The WebSocket connection or handshake failed.
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    /// The WebSocket connection closed while a request was outstanding.
    #[error("websocket closed")]
    WsClosed,
    /// A binary frame could not be decoded.
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
    /// No reply arrived before the deadline.
    #[error("timed out waiting for {0}")]
    Timeout(String),
    /// The server answered with an error-status frame.
    #[error("server returned error status for {syscall}: {message}")]
    ServerError { syscall: String, message: String },
    /// A room operation was attempted before joining.
    #[error("not joined to a room")]
    NotJoined,
    /// A reply payload was missing a required field.
    #[error("missing expected field `{0}`")]
    MissingField(&'static str),
}
