//! Rooms for the lockstep server.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns one
//! battle: its frame log, its player sessions, and its frame clock.
//!
//! # Key types
//!
//! - [`RoomManager`]: creates rooms, looks them up, drains them on shutdown
//! - [`RoomHandle`]: what the rest of the server holds to talk to a room
//! - [`Game`]: the battle state machine ([`GameState`]) driven by the actor
//! - [`LockstepEngine`]: the frame-indexed input log
//! - [`RoomConfig`] / [`GameConfig`]: timing and capacity settings

mod config;
mod error;
mod game;
mod lockstep;
mod manager;
mod room;

pub use config::{GameConfig, GameState, RoomConfig};
pub use error::RoomError;
pub use game::{Game, GameEvent};
pub use lockstep::{Frame, LockstepEngine};
pub use manager::RoomManager;
pub use room::RoomHandle;
