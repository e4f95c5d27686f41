//! Wire protocol for Envoy.
//!
//! This crate defines everything that decides what bytes look like:
//!
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how values become bytes.
//! - **Envelope** ([`Envelope`]): the outer frame every peer exchanges:
//!   request, response, or message.
//! - **Unions** ([`UnionBuilder`], [`UnionCodec`]): how a payload of one
//!   of several declared types is tagged so the other side can recover
//!   its type.
//! - **Serdes** ([`Serdes`], [`EnvelopeSerdes`]): a codec bound to the
//!   single message type a socket carries.
//!
//! # Architecture
//!
//! ```text
//! Transport (frames) → Protocol (Envelope + union payload) → RPC (calls)
//! ```
//!
//! Nothing here knows about connections or pending calls.

mod bytes;
mod codec;
mod envelope;
mod error;
mod serdes;
mod union;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use envelope::Envelope;
pub use error::ProtocolError;
pub use serdes::{EnvelopeSerdes, RawSerdes, Serdes};
pub use union::{AnyPayload, DecodedPayload, Payload, UnionBuilder, UnionCodec};
