//! Message-typed serializers bound to a socket.
//!
//! A [`Codec`] can encode anything; a [`Serdes`] is a codec pinned to the
//! single message type a socket carries. Sockets own one and apply it on
//! every send and receive, which keeps the transport layer ignorant of
//! what an envelope is.

use crate::{Codec, Envelope, ProtocolError};

/// Serializer for the one message type a socket carries.
pub trait Serdes: Send + Sync + 'static {
    /// The value sent and received through the socket.
    type Message: Send + 'static;

    /// Turns a message into one frame's worth of bytes.
    fn marshal(&self, msg: &Self::Message) -> Result<Vec<u8>, ProtocolError>;

    /// Parses one frame back into a message.
    fn unmarshal(&self, data: &[u8]) -> Result<Self::Message, ProtocolError>;
}

/// The envelope codec: serializes [`Envelope`]s with the wrapped [`Codec`].
///
/// Whoever assembles a socket for a peer constructs one of these and hands
/// it in; there is no process-wide instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeSerdes<C> {
    codec: C,
}

impl<C: Codec> EnvelopeSerdes<C> {
    /// Wraps `codec` as an envelope serializer.
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    /// The underlying codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }
}

impl<C: Codec> Serdes for EnvelopeSerdes<C> {
    type Message = Envelope;

    fn marshal(&self, msg: &Envelope) -> Result<Vec<u8>, ProtocolError> {
        self.codec.encode(msg)
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        self.codec.decode(data)
    }
}

/// Pass-through serdes for sockets that carry raw frames.
///
/// Marshalling an empty vector produces a zero-length frame, which the
/// receiving socket reports as a keepalive rather than a message.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSerdes;

impl Serdes for RawSerdes {
    type Message = Vec<u8>;

    fn marshal(&self, msg: &Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
        Ok(msg.clone())
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Ok(data.to_vec())
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::JsonCodec;

    #[test]
    fn test_envelope_serdes_round_trip() {
        let serdes = EnvelopeSerdes::new(JsonCodec);
        let env = Envelope::Message { data: vec![4, 5] };

        let bytes = serdes.marshal(&env).unwrap();
        assert_eq!(serdes.unmarshal(&bytes).unwrap(), env);
    }

    #[test]
    fn test_envelope_serdes_garbage_returns_decode_error() {
        let serdes = EnvelopeSerdes::new(JsonCodec);
        let result = serdes.unmarshal(b"\x00\x01 not an envelope");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_raw_serdes_is_identity() {
        let bytes = RawSerdes.marshal(&vec![1, 2, 3]).unwrap();
        assert_eq!(RawSerdes.unmarshal(&bytes).unwrap(), vec![1, 2, 3]);
    }
}
