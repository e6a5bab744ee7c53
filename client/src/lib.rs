//! Client side of a synchronized playback room.
//!
//! ARCHITECTURE
//! ============
//! - `clock`: one-shot server clock offset estimation.
//! - `playback`: guest synchronizer and host state producer.
//! - `relay`: host chunk slicing and the guest append pipeline.
//! - `session`: async websocket `RoomClient` speaking the frame protocol.
//!
//! Everything but `session` is transport-free and driven by explicit
//! inputs, so it runs the same against a real socket or a test harness.

pub mod clock;
pub mod config;
pub mod error;
pub mod playback;
pub mod relay;
pub mod session;

pub use config::ClientConfig;
pub use error::ClientError;
pub use session::{RoomClient, RoomEvent};
