//! Error types for the session layer.

use lockstep_protocol::{PlayerId, RoomId};

/// Errors that can occur while admitting a player.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The connect token does not match what the room expects.
    #[error("invalid token for player {0} in room {1}")]
    InvalidToken(PlayerId, RoomId),

    /// The verifier could not reach a decision (backend down, etc.).
    #[error("authentication failed: {0}")]
    AuthFailed(String),
}
