//! The outermost wire wrapper exchanged between peers.
//!
//! Every frame on a connection is exactly one [`Envelope`]. The envelope
//! only says what kind of exchange this is and how to correlate it; the
//! actual payload is opaque bytes produced by a service's union codec.
//!
//! ```text
//! ┌───────────────────────────────────┐
//! │ type: Request                     │  ← exchange kind
//! │ id:   42                          │  ← correlation id
//! │ ┌───────────────────────────────┐ │
//! │ │ data: union frame bytes       │ │  ← nested union frame
//! │ └───────────────────────────────┘ │
//! └───────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

/// One frame of the RPC protocol.
///
/// `#[serde(tag = "type")]` produces internally tagged frames, so with the
/// JSON codec a request looks like
/// `{ "type": "Request", "id": 42, "data": "<base64>" }`. Binary codecs
/// write `data` as a native byte string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// A call awaiting exactly one [`Envelope::Response`] with the same id.
    ///
    /// The id is chosen by the caller and is unique among that caller's
    /// pending calls.
    Request {
        /// Correlation id.
        id: u32,
        /// Request payload, encoded by the callee's request union.
        #[serde(with = "crate::bytes")]
        data: Vec<u8>,
    },

    /// The answer to a [`Envelope::Request`].
    Response {
        /// Equal to the id of the request being answered.
        id: u32,
        /// Response payload, encoded by the callee's response union.
        #[serde(with = "crate::bytes")]
        data: Vec<u8>,
    },

    /// Fire-and-forget. Nobody waits for an answer.
    Message {
        /// Message payload, encoded by the receiver's request union.
        #[serde(with = "crate::bytes")]
        data: Vec<u8>,
    },
}

impl Envelope {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Message { .. } => "message",
        }
    }

    /// The correlation id, if this variant carries one.
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => Some(*id),
            Self::Message { .. } => None,
        }
    }
}
