//! Packet framing.
//!
//! ```text
//! |-- payload length (u16 BE) --|-- message id (u8) --|-- payload --|
//! |------------ 2 --------------|--------- 1 ---------|--- length --|
//! ```
//!
//! Every transport message carries exactly one packet, so the length field
//! must match the number of payload bytes actually present.

use serde::{Serialize, de::DeserializeOwned};

use crate::{Codec, MessageId, ProtocolError};

/// Size of the fixed packet header.
pub const HEADER_LEN: usize = 3;

/// Largest payload accepted from a client. Client messages are tiny; anything
/// larger is treated as a protocol error.
pub const MAX_INBOUND_PAYLOAD: usize = 1024;

/// Largest payload the length field can describe.
const MAX_PAYLOAD: usize = u16::MAX as usize;

/// What goes into a packet's payload.
///
/// A closed set: nothing, bytes passed through untouched, or a message
/// value to be run through a [`Codec`].
#[derive(Debug)]
pub enum PacketBody<'a, T: ?Sized = ()> {
    Empty,
    Raw(Vec<u8>),
    Message(&'a T),
}

/// One framed message.
///
/// The id is kept as the raw header byte so that packets with ids this
/// build does not know can still be received, logged, and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: u8,
    payload: Vec<u8>,
}

impl Packet {
    /// Builds a packet from any [`PacketBody`].
    ///
    /// # Errors
    /// - `ProtocolError::Encode` if a `Message` body fails to serialize.
    /// - `ProtocolError::PayloadTooLarge` if the payload does not fit the
    ///   16-bit length field.
    pub fn build<C: Codec, T: Serialize + ?Sized>(
        codec: &C,
        id: MessageId,
        body: PacketBody<'_, T>,
    ) -> Result<Self, ProtocolError> {
        let payload = match body {
            PacketBody::Empty => Vec::new(),
            PacketBody::Raw(bytes) => bytes,
            PacketBody::Message(value) => codec.encode(value)?,
        };
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        Ok(Self {
            id: id.as_u8(),
            payload,
        })
    }

    /// A packet with no payload (acks, heartbeats, close notices).
    pub fn empty(id: MessageId) -> Self {
        Self {
            id: id.as_u8(),
            payload: Vec::new(),
        }
    }

    /// A packet whose payload is passed through unchanged.
    pub fn raw(id: MessageId, bytes: Vec<u8>) -> Result<Self, ProtocolError> {
        Self::build(&NoCodec, id, PacketBody::<()>::Raw(bytes))
    }

    /// A packet carrying `value` encoded with `codec`.
    pub fn message<C: Codec, T: Serialize + ?Sized>(
        codec: &C,
        id: MessageId,
        value: &T,
    ) -> Result<Self, ProtocolError> {
        Self::build(codec, id, PacketBody::Message(value))
    }

    /// The raw id byte from the header.
    pub fn id_byte(&self) -> u8 {
        self.id
    }

    /// The id, if it is one this build knows.
    pub fn message_id(&self) -> Option<MessageId> {
        MessageId::from_u8(self.id)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decodes the payload as `T`.
    pub fn decode_body<C: Codec, T: DeserializeOwned>(
        &self,
        codec: &C,
    ) -> Result<T, ProtocolError> {
        codec.decode(&self.payload)
    }

    /// Serializes header and payload into one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        // Fits: payload length is checked on every construction path.
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.push(self.id);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parses a packet received from a client, enforcing
    /// [`MAX_INBOUND_PAYLOAD`].
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        Self::decode_with_limit(data, MAX_INBOUND_PAYLOAD)
    }

    /// Parses a packet, rejecting payloads longer than `max_payload`.
    pub fn decode_with_limit(
        data: &[u8],
        max_payload: usize,
    ) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                len: data.len(),
                header: HEADER_LEN,
            });
        }
        let declared = u16::from_be_bytes([data[0], data[1]]) as usize;
        if declared > max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                len: declared,
                max: max_payload,
            });
        }
        let body = &data[HEADER_LEN..];
        if body.len() != declared {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }
        Ok(Self {
            id: data[2],
            payload: body.to_vec(),
        })
    }
}

/// Stand-in codec for bodies that never reach a codec.
struct NoCodec;

impl Codec for NoCodec {
    fn encode<T: Serialize + ?Sized>(
        &self,
        _value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        Err(ProtocolError::InvalidMessage(
            "raw packets carry no encodable message".into(),
        ))
    }

    fn decode<T: DeserializeOwned>(
        &self,
        _data: &[u8],
    ) -> Result<T, ProtocolError> {
        Err(ProtocolError::InvalidMessage(
            "raw packets carry no decodable message".into(),
        ))
    }
}
