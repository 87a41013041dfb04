//! Protocol types: identities, message ids, and the payloads carried
//! inside packets.
//!
//! Payload structs are plain serde types. Which payload a packet carries is
//! decided by its [`MessageId`]; the same id is used for the client request
//! and the server reply of a pair (for example `Connect` carries a
//! [`ConnectRequest`] upstream and a [`ConnectReply`] downstream).

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a player.
///
/// Newtype over `u64` so a player id can never be passed where a room id is
/// expected. `#[serde(transparent)]` keeps it a bare number on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A unique identifier for a room (one battle instance).
///
/// Room ids are assigned by whoever creates the room (matchmaking, admin
/// tooling), not by this server.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Message ids
// ---------------------------------------------------------------------------

/// The one-byte message type carried in every packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageId {
    /// Handshake: [`ConnectRequest`] up, [`ConnectReply`] down.
    Connect = 1,
    /// Keep-alive, empty both ways.
    Heartbeat = 2,
    /// Room info request (empty) / [`JoinRoomReply`].
    JoinRoom = 3,
    /// [`ProgressReport`] up / [`ProgressNotice`] down.
    Progress = 4,
    /// Ready notice up / empty ack down.
    Ready = 5,
    /// [`StartNotice`], server to client only.
    Start = 6,
    /// [`FrameBatch`], server to client only.
    Frame = 7,
    /// [`InputRequest`], client to server only.
    Input = 8,
    /// [`ResultReport`] up / empty ack down.
    Result = 9,
    /// Room is closing, empty, server to client only.
    Close = 10,
    /// Diagnostic echo; the payload is returned unchanged.
    End = 255,
}

impl MessageId {
    /// Maps a raw header byte to a known id.
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => Self::Connect,
            2 => Self::Heartbeat,
            3 => Self::JoinRoom,
            4 => Self::Progress,
            5 => Self::Ready,
            6 => Self::Start,
            7 => Self::Frame,
            8 => Self::Input,
            9 => Self::Result,
            10 => Self::Close,
            255 => Self::End,
            _ => return None,
        })
    }

    /// The raw header byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Result code of a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Ok,
    /// No live room with the requested id.
    NoRoom,
    /// The room exists but its battle is over.
    RoomState,
    /// The player is not on the room's roster.
    NoPlayer,
    /// The token was rejected.
    Token,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub player_id: PlayerId,
    pub battle_id: RoomId,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectReply {
    pub error_code: ErrorCode,
}

/// Everything a client needs to set up its local simulation.
///
/// `others` and `progress` are parallel: `progress[i]` is the last loading
/// progress reported by `others[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomReply {
    /// 1-based position of the requesting player in the roster.
    pub seat: u32,
    pub random_seed: i64,
    pub others: Vec<PlayerId>,
    pub progress: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub progress: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressNotice {
    pub player_id: PlayerId,
    pub progress: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartNotice {
    /// Unix seconds at which the battle started.
    pub timestamp: i64,
}

/// One player's input for the current frame, as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    /// Client-side sequence id.
    pub sid: i32,
    pub x: i32,
    pub y: i32,
}

/// An accepted input, stamped with the sender's identity and seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCommand {
    pub player_id: PlayerId,
    pub sid: i32,
    pub x: i32,
    pub y: i32,
    pub seat: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameData {
    pub frame_id: u32,
    /// Empty for frames in which nobody sent input.
    pub input: Vec<InputCommand>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameBatch {
    pub frames: Vec<FrameData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultReport {
    /// Opaque outcome value chosen by the client (usually the winner id).
    pub winner_id: u64,
}
