//! Clock sync estimator.
//!
//! DESIGN
//! ======
//! One `clock:time` round trip at connect. The server's reply is compared
//! against the local clock at receipt:
//!
//! ```text
//! offset = server_ts - local_at_receipt
//! server_now = local_now + offset
//! ```
//!
//! Single sample, no averaging: asymmetric latency shows up as offset error
//! and is accepted. If the round trip fails or times out the offset stays
//! zero and everything degrades to the local clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::error::ClientError;

// =============================================================================
// LOCAL CLOCK
// =============================================================================

pub trait LocalClock: Send + Sync {
    /// Local time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl LocalClock for SystemClock {
    fn now_ms(&self) -> i64 {
        let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
            return 0;
        };
        i64::try_from(dur.as_millis()).unwrap_or(0)
    }
}

/// Local clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_ms: i64) -> Self {
        Self { now: AtomicI64::new(start_ms) }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl LocalClock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// =============================================================================
// SERVER CLOCK
// =============================================================================

/// Estimated offset between the local clock and the server clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerClock {
    offset_ms: i64,
}

impl ServerClock {
    /// Offset from one server timestamp and the local time it was received.
    #[must_use]
    pub fn estimate(server_ts: i64, local_at_receipt: i64) -> Self {
        Self { offset_ms: server_ts - local_at_receipt }
    }

    #[must_use]
    pub fn offset_ms(self) -> i64 {
        self.offset_ms
    }

    /// Translate a local reading into server time.
    #[must_use]
    pub fn server_now(self, local_now: i64) -> i64 {
        local_now + self.offset_ms
    }

    /// Translate a server timestamp into local time.
    #[must_use]
    pub fn to_local(self, server_ts: i64) -> i64 {
        server_ts - self.offset_ms
    }
}

// =============================================================================
// CALIBRATION
// =============================================================================

/// Anything that can answer a server time probe.
#[async_trait::async_trait]
pub trait TimeSource: Send + Sync {
    async fn server_time(&self) -> Result<i64, ClientError>;
}

/// Run one round trip against `source`. Zero offset on failure or timeout.
pub async fn calibrate(source: &dyn TimeSource, local: &dyn LocalClock, deadline: Duration) -> ServerClock {
    match tokio::time::timeout(deadline, source.server_time()).await {
        Ok(Ok(server_ts)) => {
            let clock = ServerClock::estimate(server_ts, local.now_ms());
            info!(offset_ms = clock.offset_ms(), "clock: calibrated");
            clock
        }
        Ok(Err(e)) => {
            warn!(error = %e, "clock: time probe failed, using local clock");
            ServerClock::default()
        }
        Err(_) => {
            warn!(?deadline, "clock: time probe timed out, using local clock");
            ServerClock::default()
        }
    }
}

#[cfg(test)]
#[path = "clock_test.rs"]
mod tests;
