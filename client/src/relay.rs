//! Media relay pipeline.
//!
//! ARCHITECTURE
//! ============
//! Host: capture bytes → `ChunkAccumulator` (sliced every 250 ms) →
//! `HostStream` (enforces start → chunks → stop) → `stream:chunk` frames.
//!
//! Guest: `stream:start` / `stream:chunk` / `stream:stop` → `RelayPipeline`
//! → `PipelineAction`s → a `MediaSink` that owns the real buffer.
//!
//! GUEST STATE MACHINE
//! ===================
//! ```text
//!          stream_started           buffer_opened
//!   Idle ─────────────────▶ AwaitingOpen ─────────▶ Ready ◀──┐
//!    ▲                                               │       │ append_completed
//!    │ reset                              chunk queued│       │
//!    │                                               ▼       │
//!    └──────────────────── any ◀── append_failed ── Appending ┘
//!                                        │
//!                                        ▼
//!                                     Faulted
//! ```
//!
//! One FIFO queue, one append in flight. A failed append tears the buffer
//! down, drops the queue and asks for a rejoin; there is no partial
//! recovery. `reset` and a fresh `stream_started` both drop the queue and
//! detach the old buffer first, so fragments of one encoding never reach a
//! buffer opened for another.

use std::collections::VecDeque;

use tracing::{debug, warn};

// =============================================================================
// HOST SIDE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("stream not started")]
    NotStarted,
    #[error("stream already started with {0}")]
    AlreadyStarted(String),
    #[error("mimeType required")]
    MissingMimeType,
}

/// Host stream lifecycle. `start` must precede any chunk; the encoding is
/// fixed until `stop`.
#[derive(Debug, Default)]
pub struct HostStream {
    mime_type: Option<String>,
    chunks_sent: u64,
}

impl HostStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    #[must_use]
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Begin a stream. Returns the trimmed encoding to announce.
    ///
    /// # Errors
    ///
    /// `MissingMimeType` for a blank encoding, `AlreadyStarted` if a stream
    /// is live.
    pub fn start(&mut self, mime_type: &str) -> Result<String, RelayError> {
        if let Some(active) = &self.mime_type {
            return Err(RelayError::AlreadyStarted(active.clone()));
        }
        let mime_type = mime_type.trim();
        if mime_type.is_empty() {
            return Err(RelayError::MissingMimeType);
        }
        self.mime_type = Some(mime_type.to_owned());
        self.chunks_sent = 0;
        Ok(mime_type.to_owned())
    }

    /// Admit a captured slice for sending. Empty slices yield `None`.
    ///
    /// # Errors
    ///
    /// `NotStarted` outside a stream.
    pub fn chunk(&mut self, bytes: Vec<u8>) -> Result<Option<Vec<u8>>, RelayError> {
        if self.mime_type.is_none() {
            return Err(RelayError::NotStarted);
        }
        if bytes.is_empty() {
            return Ok(None);
        }
        self.chunks_sent += 1;
        Ok(Some(bytes))
    }

    /// End the stream. Returns whether one was live.
    pub fn stop(&mut self) -> bool {
        self.mime_type.take().is_some()
    }
}

/// Collects captured bytes between slicing ticks.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    buf: Vec<u8>,
}

impl ChunkAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take everything captured since the last tick, if anything.
    pub fn tick(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buf))
    }
}

// =============================================================================
// GUEST PIPELINE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    AwaitingOpen { mime_type: String },
    Ready { mime_type: String },
    Appending { mime_type: String },
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    /// The buffer was abandoned; the user must rejoin.
    RejoinRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineAction {
    CreateBuffer { mime_type: String },
    Append(Vec<u8>),
    DetachBuffer,
    Status(PipelineStatus),
}

/// Guest-side chunk queue and buffer state machine.
#[derive(Debug)]
pub struct RelayPipeline {
    state: PipelineState,
    queue: VecDeque<Vec<u8>>,
}

impl Default for RelayPipeline {
    fn default() -> Self {
        Self { state: PipelineState::Idle, queue: VecDeque::new() }
    }
}

impl RelayPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// A stream was announced. Tears down any previous buffer first.
    pub fn stream_started(&mut self, mime_type: &str) -> Vec<PipelineAction> {
        let mut actions = self.teardown();
        let mime_type = mime_type.to_owned();
        actions.push(PipelineAction::CreateBuffer { mime_type: mime_type.clone() });
        self.state = PipelineState::AwaitingOpen { mime_type };
        actions
    }

    /// The sink finished opening the buffer.
    pub fn buffer_opened(&mut self) -> Vec<PipelineAction> {
        let PipelineState::AwaitingOpen { mime_type } = &self.state else {
            return Vec::new();
        };
        self.state = PipelineState::Ready { mime_type: mime_type.clone() };
        self.pump()
    }

    /// A relayed chunk arrived. Ignored outside a stream.
    pub fn chunk_arrived(&mut self, chunk: Vec<u8>) -> Vec<PipelineAction> {
        match self.state {
            PipelineState::Idle | PipelineState::Faulted => {
                debug!(bytes = chunk.len(), "relay: chunk outside stream dropped");
                Vec::new()
            }
            PipelineState::AwaitingOpen { .. } | PipelineState::Appending { .. } => {
                self.queue.push_back(chunk);
                Vec::new()
            }
            PipelineState::Ready { .. } => {
                self.queue.push_back(chunk);
                self.pump()
            }
        }
    }

    /// The in-flight append finished.
    pub fn append_completed(&mut self) -> Vec<PipelineAction> {
        let PipelineState::Appending { mime_type } = &self.state else {
            return Vec::new();
        };
        self.state = PipelineState::Ready { mime_type: mime_type.clone() };
        self.pump()
    }

    /// The buffer rejected an append or failed to open. Abandon everything.
    pub fn append_failed(&mut self, reason: &str) -> Vec<PipelineAction> {
        if matches!(self.state, PipelineState::Idle | PipelineState::Faulted) {
            return Vec::new();
        }
        warn!(reason, dropped = self.queue.len(), "relay: buffer failed, rejoin required");
        self.queue.clear();
        self.state = PipelineState::Faulted;
        vec![PipelineAction::DetachBuffer, PipelineAction::Status(PipelineStatus::RejoinRequired)]
    }

    /// Stream stopped. Drop the queue and detach the buffer.
    pub fn reset(&mut self) -> Vec<PipelineAction> {
        self.teardown()
    }

    fn teardown(&mut self) -> Vec<PipelineAction> {
        self.queue.clear();
        let attached = matches!(
            self.state,
            PipelineState::AwaitingOpen { .. } | PipelineState::Ready { .. } | PipelineState::Appending { .. }
        );
        self.state = PipelineState::Idle;
        if attached { vec![PipelineAction::DetachBuffer] } else { Vec::new() }
    }

    fn pump(&mut self) -> Vec<PipelineAction> {
        let PipelineState::Ready { mime_type } = &self.state else {
            return Vec::new();
        };
        let Some(chunk) = self.queue.pop_front() else {
            return Vec::new();
        };
        self.state = PipelineState::Appending { mime_type: mime_type.clone() };
        vec![PipelineAction::Append(chunk)]
    }
}

// =============================================================================
// SINK ADAPTER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("media sink error: {0}")]
pub struct MediaError(pub String);

/// A playable-media buffer that completes operations synchronously.
pub trait MediaSink {
    /// Open a buffer for `mime_type`.
    ///
    /// # Errors
    ///
    /// The encoding is unsupported or the sink is unusable.
    fn create_buffer(&mut self, mime_type: &str) -> Result<(), MediaError>;
    /// Append one fragment.
    ///
    /// # Errors
    ///
    /// The fragment is malformed or does not match the buffer's encoding.
    fn append(&mut self, chunk: &[u8]) -> Result<(), MediaError>;
    fn detach(&mut self);
    fn status(&mut self, status: PipelineStatus);
}

/// Apply `actions` to `sink`, feeding completions back into `pipeline`
/// until nothing is left to do.
pub fn drive(pipeline: &mut RelayPipeline, sink: &mut dyn MediaSink, actions: Vec<PipelineAction>) {
    let mut work: VecDeque<PipelineAction> = actions.into();
    while let Some(action) = work.pop_front() {
        let follow_up = match action {
            PipelineAction::CreateBuffer { mime_type } => match sink.create_buffer(&mime_type) {
                Ok(()) => pipeline.buffer_opened(),
                Err(e) => pipeline.append_failed(&e.0),
            },
            PipelineAction::Append(chunk) => match sink.append(&chunk) {
                Ok(()) => pipeline.append_completed(),
                Err(e) => pipeline.append_failed(&e.0),
            },
            PipelineAction::DetachBuffer => {
                sink.detach();
                Vec::new()
            }
            PipelineAction::Status(status) => {
                sink.status(status);
                Vec::new()
            }
        };
        work.extend(follow_up);
    }
}

/// Bytes carried by a relayed chunk frame.
///
/// Prefers the binary `payload`; falls back to a JSON byte array under
/// `data.chunk`. Empty or unreadable chunks yield `None`.
#[must_use]
pub fn normalize_chunk(frame: &frames::Frame) -> Option<Vec<u8>> {
    if let Some(bytes) = frame.payload.as_ref().filter(|b| !b.is_empty()) {
        return Some(bytes.clone());
    }
    let items = frame.data.get("chunk")?.as_array()?;
    let bytes = items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect::<Option<Vec<u8>>>()?;
    if bytes.is_empty() { None } else { Some(bytes) }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
