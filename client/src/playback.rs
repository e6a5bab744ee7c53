//! Playback synchronizer.
//!
//! DESIGN
//! ======
//! Guests converge a local player onto the room's authoritative
//! `PlaybackState`:
//!
//! ```text
//! expected = position + (isPlaying ? max(0, server_now - observedAt) / 1000 : 0)
//! seek if |local - expected| > 0.25 s
//! play or pause to match isPlaying
//! ```
//!
//! Applying the same state twice is a no-op the second time: the seek is
//! within threshold and the transport already matches.
//!
//! An unlock gate models platforms that refuse unsolicited audio. Until the
//! user interacts, the latest state is parked as pending and applied once
//! on unlock.
//!
//! Hosts run the other half: `HostPublisher` turns local transport edges
//! into states to publish and re-sends the current state on a heartbeat
//! while playing.

use std::time::Duration;

use frames::protocol::PlaybackState;

use crate::config::ClientConfig;

/// Drift tolerated before the synchronizer seeks.
pub const SEEK_THRESHOLD_SECS: f64 = 0.25;

/// Where the host's cursor should be at `server_now_ms`, in seconds.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn expected_position(state: &PlaybackState, server_now_ms: i64) -> f64 {
    if !state.is_playing {
        return state.position;
    }
    let elapsed_ms = (server_now_ms - state.observed_at).max(0);
    state.position + elapsed_ms as f64 / 1000.0
}

// =============================================================================
// SINK
// =============================================================================

/// Playback refused by the platform, e.g. autoplay policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("playback blocked: {0}")]
pub struct PlayBlocked(pub String);

/// A local player the synchronizer can steer.
pub trait PlaybackSink {
    /// Current cursor in seconds.
    fn position(&self) -> f64;
    fn seek(&mut self, position: f64);
    /// Start playback.
    ///
    /// # Errors
    ///
    /// `PlayBlocked` when the platform refuses to start audio.
    fn play(&mut self) -> Result<(), PlayBlocked>;
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
}

// =============================================================================
// SYNCHRONIZER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Locked: state parked until unlock.
    Pending,
    Playing,
    Paused,
    /// Host start is in the future; re-apply after `delay_ms`.
    StartScheduled { delay_ms: i64 },
    /// The sink refused to play; needs a user gesture and an unlock.
    NeedsInteraction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncReport {
    pub status: SyncStatus,
    /// Seek target, if a seek was issued.
    pub seeked_to: Option<f64>,
}

impl SyncReport {
    /// How long to wait before re-applying, for a scheduled start.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self.status {
            SyncStatus::StartScheduled { delay_ms } => Some(Duration::from_millis(delay_ms.max(0).unsigned_abs())),
            _ => None,
        }
    }
}

/// Guest-side state applier with the unlock gate.
#[derive(Debug, Default)]
pub struct Synchronizer {
    unlocked: bool,
    pending: Option<PlaybackState>,
    current: Option<PlaybackState>,
    blocked: bool,
}

impl Synchronizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Latest authoritative state seen.
    #[must_use]
    pub fn current(&self) -> Option<PlaybackState> {
        self.current
    }

    /// Accept a new authoritative state. Applied now if unlocked, otherwise
    /// parked (replacing any earlier parked state).
    pub fn receive(&mut self, state: PlaybackState, sink: &mut dyn PlaybackSink, server_now_ms: i64) -> SyncReport {
        self.current = Some(state);
        if !self.unlocked {
            self.pending = Some(state);
            return SyncReport { status: SyncStatus::Pending, seeked_to: None };
        }
        self.apply(state, sink, server_now_ms)
    }

    /// Open the gate after a user gesture. Applies the parked state exactly
    /// once; after a blocked play, re-applies the current state instead.
    pub fn unlock(&mut self, sink: &mut dyn PlaybackSink, server_now_ms: i64) -> Option<SyncReport> {
        self.unlocked = true;
        let state = match self.pending.take() {
            Some(state) => state,
            None if self.blocked => self.current?,
            None => return None,
        };
        Some(self.apply(state, sink, server_now_ms))
    }

    /// Re-apply the current state, e.g. when a scheduled start comes due.
    pub fn resync(&mut self, sink: &mut dyn PlaybackSink, server_now_ms: i64) -> Option<SyncReport> {
        if !self.unlocked {
            return None;
        }
        let state = self.current?;
        Some(self.apply(state, sink, server_now_ms))
    }

    fn apply(&mut self, state: PlaybackState, sink: &mut dyn PlaybackSink, server_now_ms: i64) -> SyncReport {
        let report = sync_once(&state, sink, server_now_ms);
        self.blocked = report.status == SyncStatus::NeedsInteraction;
        report
    }
}

/// Converge `sink` onto `state` once.
pub fn sync_once(state: &PlaybackState, sink: &mut dyn PlaybackSink, server_now_ms: i64) -> SyncReport {
    let scheduled = state.is_playing && state.observed_at > server_now_ms;
    let expected = if scheduled { state.position } else { expected_position(state, server_now_ms) };

    let mut seeked_to = None;
    if expected.is_finite() && (sink.position() - expected).abs() > SEEK_THRESHOLD_SECS {
        sink.seek(expected);
        seeked_to = Some(expected);
    }

    if scheduled {
        if !sink.is_paused() {
            sink.pause();
        }
        let delay_ms = state.observed_at - server_now_ms;
        return SyncReport { status: SyncStatus::StartScheduled { delay_ms }, seeked_to };
    }

    if !state.is_playing {
        if !sink.is_paused() {
            sink.pause();
        }
        return SyncReport { status: SyncStatus::Paused, seeked_to };
    }

    if sink.is_paused() {
        if let Err(e) = sink.play() {
            tracing::warn!(error = %e, "sync: play refused, waiting for interaction");
            return SyncReport { status: SyncStatus::NeedsInteraction, seeked_to };
        }
    }
    SyncReport { status: SyncStatus::Playing, seeked_to }
}

// =============================================================================
// HOST PUBLISHER
// =============================================================================

/// Local transport edge on the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalEvent {
    Play { position: f64 },
    Pause { position: f64 },
    Seek { position: f64 },
}

/// Host-side producer of playback states.
#[derive(Debug)]
pub struct HostPublisher {
    start_lead_ms: i64,
    heartbeat_ms: i64,
    playing: bool,
    last_sent_ms: Option<i64>,
}

impl HostPublisher {
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            start_lead_ms: config.start_lead_ms,
            heartbeat_ms: i64::try_from(config.heartbeat.as_millis()).unwrap_or(i64::MAX),
            playing: false,
            last_sent_ms: None,
        }
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// State to publish for a local edge.
    ///
    /// A play edge is stamped `start_lead_ms` ahead of server-now so guests
    /// have time to receive it and start together with the host.
    pub fn on_local_event(&mut self, event: LocalEvent, server_now_ms: i64) -> PlaybackState {
        let state = match event {
            LocalEvent::Play { position } => {
                self.playing = true;
                PlaybackState { is_playing: true, position: clamp(position), observed_at: server_now_ms + self.start_lead_ms }
            }
            LocalEvent::Pause { position } => {
                self.playing = false;
                PlaybackState { is_playing: false, position: clamp(position), observed_at: server_now_ms }
            }
            LocalEvent::Seek { position } => {
                PlaybackState { is_playing: self.playing, position: clamp(position), observed_at: server_now_ms }
            }
        };
        self.last_sent_ms = Some(server_now_ms);
        state
    }

    /// Heartbeat state, when playing and the interval has elapsed.
    pub fn heartbeat(&mut self, position: f64, server_now_ms: i64) -> Option<PlaybackState> {
        if !self.playing {
            return None;
        }
        if let Some(last) = self.last_sent_ms {
            if server_now_ms - last < self.heartbeat_ms {
                return None;
            }
        }
        self.last_sent_ms = Some(server_now_ms);
        Some(PlaybackState { is_playing: true, position: clamp(position), observed_at: server_now_ms })
    }
}

fn clamp(position: f64) -> f64 {
    if position.is_finite() { position.max(0.0) } else { 0.0 }
}

#[cfg(test)]
#[path = "playback_test.rs"]
mod tests;
