//! Room coordination server for synchronized audio playback.
//!
//! One connection per room hosts; everyone else follows. The server keeps
//! the authoritative playback and stream state per room, answers clock
//! probes, and relays the host's audio fragments to guests in order.

pub mod clock;
pub mod config;
pub mod frame;
pub mod routes;
pub mod services;
pub mod state;
