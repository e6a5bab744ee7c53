//! Terminal stand-ins for a browser's media element.
//!
//! `FileSink` writes relayed fragments to disk in arrival order, so the
//! output can be played back with any tool that reads the stream's
//! container. `ConsolePlayer` keeps a virtual cursor driven by a monotonic
//! clock and logs every transport change the synchronizer makes.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use syncroom_client::playback::{PlayBlocked, PlaybackSink};
use syncroom_client::relay::{MediaError, MediaSink, PipelineStatus};
use tracing::{info, warn};

// =============================================================================
// FILE SINK
// =============================================================================

#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    written: u64,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), file: None, written: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended since the last `create_buffer`.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl MediaSink for FileSink {
    fn create_buffer(&mut self, mime_type: &str) -> Result<(), MediaError> {
        let file = File::create(&self.path).map_err(|e| MediaError(e.to_string()))?;
        info!(path = %self.path.display(), mime_type, "sink: buffer opened");
        self.file = Some(file);
        self.written = 0;
        Ok(())
    }

    fn append(&mut self, chunk: &[u8]) -> Result<(), MediaError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| MediaError("no buffer attached".to_owned()))?;
        file.write_all(chunk).map_err(|e| MediaError(e.to_string()))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                warn!(error = %e, "sink: flush failed");
            }
            info!(path = %self.path.display(), bytes = self.written, "sink: buffer detached");
        }
    }

    fn status(&mut self, status: PipelineStatus) {
        match status {
            PipelineStatus::RejoinRequired => warn!("sink: stream broke, rejoin the room to recover"),
        }
    }
}

// =============================================================================
// CONSOLE PLAYER
// =============================================================================

/// Virtual player: a cursor that advances with wall time while playing.
#[derive(Debug)]
pub struct ConsolePlayer {
    base_position: f64,
    started: Option<Instant>,
}

impl Default for ConsolePlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsolePlayer {
    pub fn new() -> Self {
        Self { base_position: 0.0, started: None }
    }
}

impl PlaybackSink for ConsolePlayer {
    fn position(&self) -> f64 {
        match self.started {
            Some(at) => self.base_position + at.elapsed().as_secs_f64(),
            None => self.base_position,
        }
    }

    fn seek(&mut self, position: f64) {
        info!(from = self.position(), to = position, "player: seek");
        self.base_position = position;
        if self.started.is_some() {
            self.started = Some(Instant::now());
        }
    }

    fn play(&mut self) -> Result<(), PlayBlocked> {
        if self.started.is_none() {
            info!(position = self.base_position, "player: play");
            self.started = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.started.is_some() {
            self.base_position = self.position();
            self.started = None;
            info!(position = self.base_position, "player: pause");
        }
    }

    fn is_paused(&self) -> bool {
        self.started.is_none()
    }
}

#[cfg(test)]
#[path = "sinks_test.rs"]
mod tests;
