//! Room registry operations.
//!
//! ARCHITECTURE
//! ============
//! The registry is the single owner of room state. Websocket handlers call
//! these methods while holding the `AppState.rooms` write lock; each method
//! validates, delegates the state transition to `services::session`, and
//! commits the result. Fan-out to member outboxes also happens under the
//! lock so peers observe events in the order the registry applied them.
//!
//! LIFECYCLE
//! =========
//! Rooms are created lazily by the first `join` and removed only by
//! `collect_if_empty`, which `leave` runs after every departure. A room with
//! members is never collected.

use frames::protocol::{JoinReply, PlaybackState, Role, STREAM_CHUNK, STREAM_STOP, StreamState};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::frame::{Data, Frame};
use crate::services::session::{self, Command, Effect, Rejection};
use crate::state::{ConnectionId, Member, Membership, Outbox, Room, RoomRegistry};

// =============================================================================
// TYPES
// =============================================================================

/// What a joiner learns about the room.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSnapshot {
    pub room_key: String,
    pub role: Role,
    pub has_host: bool,
    pub playback: Option<PlaybackState>,
    pub stream: StreamState,
    /// Set when a host join took the slot from a streaming host.
    pub handover: Option<Effect>,
}

impl JoinSnapshot {
    #[must_use]
    pub fn reply(&self) -> JoinReply {
        JoinReply {
            room_id: self.room_key.clone(),
            role: self.role,
            has_host: self.has_host,
            state: self.playback,
            stream: self.stream.clone(),
        }
    }
}

/// Result of a connection leaving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_key: String,
    pub role: Role,
    /// The leaver held the host slot; remaining members need `stream:stop`.
    pub released_host: bool,
    pub room_removed: bool,
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Removed,
    Retained { members: usize },
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("room {0} is empty but still registered")]
    EmptyRoom(String),
    #[error("host of room {0} is not a member")]
    HostNotMember(String),
    #[error("connection {0} points at a missing room or membership")]
    DanglingConnection(ConnectionId),
    #[error("member {conn} of room {room} is not indexed")]
    UnindexedMember { room: String, conn: ConnectionId },
}

// =============================================================================
// OPERATIONS
// =============================================================================

impl RoomRegistry {
    /// Join `conn` to a room, creating it on first use.
    ///
    /// # Errors
    ///
    /// `MissingRoomKey` for a blank key, `AlreadyJoined` if the connection
    /// is already in a room.
    pub fn join(
        &mut self,
        conn: ConnectionId,
        room_key: &str,
        role: Role,
        outbox: Outbox,
    ) -> Result<JoinSnapshot, Rejection> {
        let room_key = room_key.trim();
        if room_key.is_empty() {
            return Err(Rejection::MissingRoomKey);
        }
        if self.connections.contains_key(&conn) {
            return Err(Rejection::AlreadyJoined);
        }

        let room = self.rooms.entry(room_key.to_owned()).or_insert_with(|| {
            info!(room = %room_key, "registry: room created");
            Room::default()
        });

        let mut handover = None;
        if role == Role::Host {
            let (next, effect) = session::claim_host(&room.state, conn);
            room.state = next;
            handover = effect;
        }
        room.members.insert(conn, Member { role, outbox });
        self.connections
            .insert(conn, Membership { room_key: room_key.to_owned(), role });

        Ok(JoinSnapshot {
            room_key: room_key.to_owned(),
            role,
            has_host: room.state.host.is_hosted(),
            playback: room.state.playback,
            stream: room.state.stream.clone(),
            handover,
        })
    }

    /// Apply a host command to the sender's room and commit the transition.
    ///
    /// # Errors
    ///
    /// `UnknownRoom` / `NotMember` when the sender is not in `room_key`, plus
    /// any rejection from [`session::apply`].
    pub fn apply(&mut self, conn: ConnectionId, room_key: &str, command: Command) -> Result<Effect, Rejection> {
        let room = self.member_room_mut(conn, room_key)?;
        let transition = session::apply(&room.state, conn, command)?;
        room.state = transition.state;
        Ok(transition.effect)
    }

    /// Current playback state of the sender's room.
    ///
    /// # Errors
    ///
    /// `NoPlaybackState` if the host never published one, plus the membership
    /// rejections of [`RoomRegistry::apply`].
    pub fn playback(&self, conn: ConnectionId, room_key: &str) -> Result<PlaybackState, Rejection> {
        let room_key = room_key.trim();
        let room = self
            .rooms
            .get(room_key)
            .ok_or_else(|| Rejection::UnknownRoom(room_key.to_owned()))?;
        if !room.members.contains_key(&conn) {
            return Err(Rejection::NotMember);
        }
        room.state.playback.ok_or(Rejection::NoPlaybackState)
    }

    /// Remove `conn` from its room, release the host slot if it held it, and
    /// collect the room if nobody is left.
    pub fn leave(&mut self, conn: ConnectionId) -> Option<Departure> {
        let membership = self.connections.remove(&conn)?;
        let Some(room) = self.rooms.get_mut(&membership.room_key) else {
            warn!(%conn, room = %membership.room_key, "registry: membership without room");
            return None;
        };

        room.members.remove(&conn);
        let released_host = match session::release_host(&room.state, conn) {
            Some(transition) => {
                room.state = transition.state;
                true
            }
            None => false,
        };

        let collection = self.collect_if_empty(&membership.room_key);
        let remaining = match collection {
            Collection::Retained { members } => members,
            Collection::Removed | Collection::Missing => 0,
        };

        Some(Departure {
            room_key: membership.room_key,
            role: membership.role,
            released_host,
            room_removed: collection == Collection::Removed,
            remaining,
        })
    }

    /// Remove the room if it has no members. The registry's only GC path.
    pub fn collect_if_empty(&mut self, room_key: &str) -> Collection {
        let Some(room) = self.rooms.get(room_key) else {
            return Collection::Missing;
        };
        if !room.members.is_empty() {
            return Collection::Retained { members: room.members.len() };
        }
        self.rooms.remove(room_key);
        info!(room = %room_key, "registry: room removed");
        Collection::Removed
    }

    // =========================================================================
    // FAN-OUT
    // =========================================================================

    /// Enqueue `frame` for every member except `exclude`. Returns how many
    /// outboxes accepted it.
    ///
    /// A full outbox loses a `stream:chunk` for that member only. Any other
    /// frame is control traffic the member cannot miss, so a member whose
    /// outbox is full for one is evicted instead: its outbox sender is
    /// dropped, which ends its connection, and it must rejoin.
    pub fn fan_out(&mut self, room_key: &str, frame: &Frame, exclude: Option<ConnectionId>) -> usize {
        let Some(room) = self.rooms.get(room_key) else {
            return 0;
        };

        let mut delivered = 0;
        let mut stalled = Vec::new();
        for (conn, member) in &room.members {
            if exclude == Some(*conn) {
                continue;
            }
            match member.outbox.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) if frame.syscall == STREAM_CHUNK => {
                    debug!(%conn, room = %room_key, "registry: outbox full, chunk dropped");
                }
                Err(TrySendError::Full(_)) => stalled.push(*conn),
                Err(TrySendError::Closed(_)) => {
                    debug!(%conn, room = %room_key, "registry: outbox closed");
                }
            }
        }

        for conn in stalled {
            warn!(%conn, room = %room_key, syscall = %frame.syscall, "registry: outbox full, member evicted");
            self.depart(conn);
        }
        delivered
    }

    /// [`RoomRegistry::leave`], then end the stream for whoever is left if
    /// the leaver was the host.
    pub fn depart(&mut self, conn: ConnectionId) -> Option<Departure> {
        let departure = self.leave(conn)?;
        if departure.released_host {
            let stop = Frame::request(STREAM_STOP, Data::new()).with_room_id(&departure.room_key);
            let delivered = self.fan_out(&departure.room_key, &stop, None);
            info!(%conn, room = %departure.room_key, delivered, "registry: host left, stream stopped");
        }
        Some(departure)
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of host slots held in `room_key`: 0 or 1.
    #[must_use]
    pub fn host_count(&self, room_key: &str) -> usize {
        self.rooms
            .get(room_key)
            .map_or(0, |room| usize::from(room.state.host.is_hosted()))
    }

    /// Verify the registry's structural invariants.
    ///
    /// # Errors
    ///
    /// The first violation found.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (key, room) in &self.rooms {
            if room.members.is_empty() {
                return Err(InvariantViolation::EmptyRoom(key.clone()));
            }
            if let crate::state::HostSlot::Hosted(host) = room.state.host {
                if !room.members.contains_key(&host) {
                    return Err(InvariantViolation::HostNotMember(key.clone()));
                }
            }
            for conn in room.members.keys() {
                let indexed = self
                    .connections
                    .get(conn)
                    .is_some_and(|m| &m.room_key == key);
                if !indexed {
                    return Err(InvariantViolation::UnindexedMember { room: key.clone(), conn: *conn });
                }
            }
        }
        for (conn, membership) in &self.connections {
            let present = self
                .rooms
                .get(&membership.room_key)
                .is_some_and(|room| room.members.contains_key(conn));
            if !present {
                return Err(InvariantViolation::DanglingConnection(*conn));
            }
        }
        Ok(())
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn member_room_mut(&mut self, conn: ConnectionId, room_key: &str) -> Result<&mut Room, Rejection> {
        let room_key = room_key.trim();
        if room_key.is_empty() {
            return Err(Rejection::MissingRoomKey);
        }
        let room = self
            .rooms
            .get_mut(room_key)
            .ok_or_else(|| Rejection::UnknownRoom(room_key.to_owned()))?;
        if !room.members.contains_key(&conn) {
            return Err(Rejection::NotMember);
        }
        Ok(room)
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
