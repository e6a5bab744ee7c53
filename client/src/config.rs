//! Client tunables.

use std::time::Duration;

/// Timing knobs shared by the session, synchronizer, and relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Deadline for a single request/reply exchange.
    pub request_timeout: Duration,
    /// Host re-broadcast interval while playing.
    pub heartbeat: Duration,
    /// How far ahead of server-now a host schedules a play edge.
    pub start_lead_ms: i64,
    /// Capture slicing interval for the host stream.
    pub slice: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            heartbeat: Duration::from_secs(2),
            start_lead_ms: 1_000,
            slice: Duration::from_millis(250),
        }
    }
}
