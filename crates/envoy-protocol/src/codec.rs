//! Codec trait and implementations for serializing/deserializing values.
//!
//! A codec turns any serde type into bytes and back. Everything above it
//! (envelopes, payload unions, service contracts) is written against the
//! [`Codec`] trait, so swapping JSON for a binary format touches nothing
//! but the value handed in at setup time.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a codec instance is shared by the
/// socket, the receive task, and every caller issuing requests.
///
/// `decode` uses `DeserializeOwned` so decoded values never borrow from
/// the receive buffer, which is reused for the next frame.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns an error if the value can't be represented in this format:
    /// `ProtocolError::Encode` from [`JsonCodec`], `ProtocolError::Codec`
    /// from custom codecs.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns an error if the bytes are malformed, truncated, or don't
    /// match the expected type: `ProtocolError::Decode` from
    /// [`JsonCodec`], `ProtocolError::Codec` from custom codecs.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Readable on the wire, which makes captured traffic easy to inspect.
/// Behind the `json` feature (enabled by default).
///
/// ## Example
///
/// ```rust
/// use envoy_protocol::{Codec, Envelope, JsonCodec};
///
/// let codec = JsonCodec;
///
/// let envelope = Envelope::Request { id: 7, data: vec![1, 2, 3] };
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
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
