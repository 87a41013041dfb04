//! Unified error type for the lockstep server.

use lockstep_protocol::ProtocolError;
use lockstep_room::RoomError;
use lockstep_session::SessionError;
use lockstep_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum LockstepError {
    /// Binding, accepting, sending, or receiving failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Bad framing or an undecodable payload.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A token verifier failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Room creation or lookup failed.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The configuration file could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
