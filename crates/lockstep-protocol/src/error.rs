//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means the bytes were wrong: bad framing, a
//! payload that does not decode, or a packet too large to carry. It never
//! describes game state.

/// Errors that can occur while framing or (de)serializing packets.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization of a payload failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// A payload did not decode into the expected message type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// Fewer bytes than a packet header.
    #[error("truncated packet: {len} bytes, header needs {header}")]
    Truncated { len: usize, header: usize },

    /// The payload exceeds the allowed ceiling.
    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// The header's length field disagrees with the bytes present.
    #[error("length field says {declared} bytes but {actual} follow")]
    LengthMismatch { declared: usize, actual: usize },

    /// The message passed decoding but violates protocol rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
