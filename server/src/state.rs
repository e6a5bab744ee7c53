//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the room registry and the server clock. The registry is the
//! only shared mutable resource: every room mutation happens under its
//! write lock, so events for one room are applied one at a time and the
//! resulting fan-out is enqueued before the next event is considered.

use std::collections::HashMap;
use std::sync::Arc;

use frames::protocol::{PlaybackState, Role, StreamState};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::frame::Frame;

/// Transport-level session identifier, minted on websocket upgrade.
pub type ConnectionId = Uuid;

/// Outbound frame queue for one connection.
pub type Outbox = mpsc::Sender<Frame>;

// =============================================================================
// ROOM STATE
// =============================================================================

/// Who owns the room's transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostSlot {
    #[default]
    Unowned,
    Hosted(ConnectionId),
}

impl HostSlot {
    #[must_use]
    pub fn is_hosted(self) -> bool {
        matches!(self, Self::Hosted(_))
    }

    #[must_use]
    pub fn is_held_by(self, conn: ConnectionId) -> bool {
        self == Self::Hosted(conn)
    }
}

/// Authoritative shared state of one room.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoomState {
    pub host: HostSlot,
    pub playback: Option<PlaybackState>,
    pub stream: StreamState,
}

/// A joined connection as seen from its room.
#[derive(Debug, Clone)]
pub struct Member {
    pub role: Role,
    pub outbox: Outbox,
}

/// Live room: shared state plus connected members.
#[derive(Debug, Default)]
pub struct Room {
    pub state: RoomState,
    pub members: HashMap<ConnectionId, Member>,
}

/// Back-reference from a connection to the room it joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub room_key: String,
    pub role: Role,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Process-wide map of room key to room, plus the connection index.
///
/// Operations live in `services::registry`.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    pub(crate) rooms: HashMap<String, Room>,
    pub(crate) connections: HashMap<ConnectionId, Membership>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn room(&self, room_key: &str) -> Option<&Room> {
        self.rooms.get(room_key)
    }

    #[must_use]
    pub fn membership(&self, conn: ConnectionId) -> Option<&Membership> {
        self.connections.get(&conn)
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<RoomRegistry>>,
    pub clock: Arc<dyn Clock>,
    /// Capacity of each connection's outbound channel.
    pub outbox_capacity: usize,
}

impl AppState {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, outbox_capacity: usize) -> Self {
        Self { rooms: Arc::new(RwLock::new(RoomRegistry::new())), clock, outbox_capacity: outbox_capacity.max(1) }
    }

    /// Current server time in epoch milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DEFAULT_OUTBOX_CAPACITY;

    /// Fixed starting instant for test clocks.
    pub const T0: i64 = 1_700_000_000_000;

    /// Create a test `AppState` on a manual clock starting at [`T0`].
    #[must_use]
    pub fn test_app_state() -> (AppState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        (AppState::new(clock.clone(), DEFAULT_OUTBOX_CAPACITY), clock)
    }

    /// A connection id plus the receiving end of its outbox.
    #[must_use]
    pub fn connection() -> (ConnectionId, Outbox, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(DEFAULT_OUTBOX_CAPACITY);
        (Uuid::new_v4(), tx, rx)
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
