//! Error types for the protocol layer.
//!
//! Each crate in Envoy defines its own error enum. A `ProtocolError`
//! always means "these bytes and this type didn't agree": serialization,
//! deserialization, or a tag outside the union's closed set.

/// Errors that can occur while encoding or decoding wire values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust value).
    ///
    /// Common causes: malformed input, missing fields, wrong types, or
    /// truncated frames.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A codec other than the built-in ones failed.
    ///
    /// Custom [`Codec`](crate::Codec) implementations report their own
    /// encode and decode failures through this variant.
    #[error("codec error: {0}")]
    Codec(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// A union frame carried a tag that no declared type owns.
    ///
    /// This is what a peer built from a different contract looks like
    /// on the wire.
    #[error("unknown union tag {0}")]
    UnknownTag(u32),

    /// A value was handed to a union that was never told about its type.
    #[error("type {0} is not part of this union")]
    UnregisteredType(&'static str),

    /// A value's dynamic type didn't match the type its tag promised.
    ///
    /// Indicates a codec/tag mismatch inside this process, not bad input
    /// from the network.
    #[error("payload type mismatch: expected {expected}")]
    TypeMismatch {
        /// The type the caller asked for.
        expected: &'static str,
    },
}

impl ProtocolError {
    /// Wraps the error of a custom codec.
    pub fn codec(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self::Codec(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_wraps_any_error_source() {
        let err = ProtocolError::codec(std::io::Error::other("bad varint"));
        assert!(matches!(err, ProtocolError::Codec(_)));
        assert_eq!(err.to_string(), "codec error: bad varint");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_codec_error_from_message() {
        let err = ProtocolError::codec("unsupported type");
        assert_eq!(err.to_string(), "codec error: unsupported type");
    }
}
