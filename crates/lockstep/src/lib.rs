//! # Lockstep
//!
//! Frame-synchronized battle server.
//!
//! Clients of one battle connect, confirm they are ready, and send their
//! inputs. The server stamps every input into the frame it arrived in and
//! streams the ordered frame log back to every client, so each one can run
//! the same deterministic simulation. The server never looks at what an
//! input means.
//!
//! The sub-crates each own one layer:
//!
//! - `lockstep-transport`: WebSocket connections
//! - `lockstep-protocol`: packet framing and message payloads
//! - `lockstep-session`: per-player state and token checks
//! - `lockstep-tick`: the fixed-rate frame clock
//! - `lockstep-room`: room actors, the battle state machine, the registry
//!
//! This crate wires them into a server.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lockstep::prelude::*;
//!
//! # async fn run() -> Result<(), LockstepError> {
//! let server = LockstepServer::builder().bind("0.0.0.0:10086").build().await?;
//! let rooms = server.room_manager();
//! let room = rooms
//!     .create_room(RoomId(1), 0, vec![PlayerId(1), PlayerId(2)], 42, "match-1")
//!     .await?;
//! println!("token for room {}: {}", room.id(), room.secret_key());
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::{ConfigError, ServerConfig, StartupRoom, TokenMode};
pub use error::LockstepError;
pub use server::{LockstepServer, LockstepServerBuilder};

/// Everything needed to run a server and talk to its rooms.
pub mod prelude {
    pub use crate::{
        ConfigError, LockstepError, LockstepServer, LockstepServerBuilder, ServerConfig,
        StartupRoom, TokenMode,
    };
    pub use lockstep_protocol::{
        ConnectReply, ConnectRequest, ErrorCode, JsonCodec, MessageId, Packet, PlayerId,
        RoomId,
    };
    pub use lockstep_room::{GameConfig, RoomConfig, RoomError, RoomHandle, RoomManager};
    pub use lockstep_session::{AllowAll, ConnectClaim, RoomKeyVerifier, SessionError, TokenVerifier};
    pub use lockstep_tick::{TickConfig, TickPolicy};
}
