//! Error types for the room layer.

use lockstep_protocol::RoomId;

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// A live room already uses this id. Nothing was registered.
    #[error("room {0} already exists")]
    DuplicateId(RoomId),

    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The manager has been stopped and accepts no new rooms.
    #[error("room manager is shutting down")]
    ShuttingDown,
}
