//! Wire protocol for the lockstep server.
//!
//! This crate defines the "language" that battle clients and the server
//! speak:
//!
//! - **Packets** ([`Packet`], [`PacketBody`]): the length-prefixed,
//!   id-tagged frame every message travels in.
//! - **Messages** ([`MessageId`], [`ConnectRequest`], [`FrameBatch`], ...):
//!   the payload shapes carried inside packets.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how payloads are turned
//!   into bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong while framing or
//!   decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the room
//! layer (typed messages). It knows nothing about rooms or connections.
//!
//! ```text
//! Transport (bytes) → Protocol (Packet) → Room (Game::process_msg)
//! ```

mod codec;
mod error;
mod packet;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use packet::{HEADER_LEN, MAX_INBOUND_PAYLOAD, Packet, PacketBody};
pub use types::{
    ConnectReply, ConnectRequest, ErrorCode, FrameBatch, FrameData,
    InputCommand, InputRequest, JoinRoomReply, MessageId, PlayerId,
    ProgressNotice, ProgressReport, ResultReport, RoomId, StartNotice,
};
