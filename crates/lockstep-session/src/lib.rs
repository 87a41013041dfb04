//! Player sessions for the lockstep server.
//!
//! A session is the server's persistent record of one roster member in one
//! battle. Connections come and go; the session stays for the life of the
//! room and remembers readiness, loading progress, heartbeat health, and how
//! far into the frame log the player has been served.
//!
//! # Key types
//!
//! - [`PlayerSession`]: one roster member's state
//! - [`SessionRoster`]: all sessions of a battle, in seat order
//! - [`ConnectionHandle`]: exclusive handle to a connection's writer task
//! - [`TokenVerifier`]: hook that decides whether a connect token is valid
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)  ← owns a SessionRoster per Game
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Protocol / Transport (below)  ← Packet, PlayerId, ConnectionId
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod connection;
mod error;
mod roster;
mod session;

pub use auth::{AllowAll, ConnectClaim, RoomKeyVerifier, TokenVerifier};
pub use connection::{ConnectionHandle, Outbound};
pub use error::SessionError;
pub use roster::SessionRoster;
pub use session::PlayerSession;
