//! Codec trait and implementations for packet payloads.
//!
//! The packet frame treats its payload as opaque bytes. A [`Codec`] decides
//! what those bytes look like. [`JsonCodec`] is the default: readable in a
//! packet capture and trivially consumed by script-based clients.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes message values to payload bytes and back.
///
/// `Send + Sync + 'static` because one codec value is shared by every
/// room actor and connection task on the runtime.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into payload bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes payload bytes into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or do
    /// not match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use lockstep_protocol::{Codec, JsonCodec, PlayerId, ProgressNotice};
///
/// let codec = JsonCodec;
/// let notice = ProgressNotice { player_id: PlayerId(3), progress: 40 };
///
/// let bytes = codec.encode(&notice).unwrap();
/// let decoded: ProgressNotice = codec.decode(&bytes).unwrap();
/// assert_eq!(notice, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
