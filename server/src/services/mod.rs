//! Domain services used by the websocket gateway.
//!
//! ARCHITECTURE
//! ============
//! `session` holds the room state machine as pure functions; `registry`
//! owns the process-wide room map and commits those transitions. Route
//! handlers stay focused on frame translation and fan-out.

pub mod registry;
pub mod session;
