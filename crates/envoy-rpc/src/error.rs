//! Error types for the RPC layer.
//!
//! Two enums with very different audiences:
//!
//! - [`RpcError`] is what callers see at runtime: timeouts, lost
//!   connections, undecodable payloads.
//! - [`ConfigError`] only comes out of setup calls (`build`, `connect`,
//!   `Peer::rpc`, `Peer::message`). It means the contract and the code
//!   disagree, and the right reaction is to fix the code.

use std::time::Duration;

use envoy_protocol::ProtocolError;
use envoy_transport::TransportError;

/// Errors returned by calls, sends, and the receive loop.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No response arrived before the deadline.
    #[error("call {id} timed out after {after:?}")]
    Timeout {
        /// Correlation id of the abandoned call.
        id: u32,
        /// The deadline that passed.
        after: Duration,
    },

    /// The socket has no transport right now (usually mid-redial).
    #[error("peer disconnected")]
    Disconnected,

    /// The peer or its socket was closed.
    #[error("peer closed")]
    Closed,

    /// A payload could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The encoded request or response is larger than the socket will
    /// send. The connection is unaffected.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Size of the encoded frame.
        size: usize,
        /// Largest frame the socket sends.
        limit: usize,
    },

    /// A decoded payload was not the type the call site expected.
    ///
    /// Means the two sides' unions assign tags differently; not something
    /// a retry will fix.
    #[error("payload type mismatch: expected {expected}")]
    TypeMismatch {
        /// The type the call site asked for.
        expected: &'static str,
    },

    /// A decoded request or message has no handler on this peer.
    #[error("no handler registered for {0}")]
    NoHandler(&'static str),

    /// A response arrived for a call that is not pending (never made, or
    /// already timed out).
    #[error("response for unknown call {0}")]
    UnknownCall(u32),
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => Self::Closed,
            TransportError::Serdes(e) => Self::Protocol(e),
            TransportError::FrameTooLarge { size, limit } => Self::FrameTooLarge { size, limit },
            // Any other send failure means the transport is going away
            // and the socket is (or will be) redialing.
            _ => Self::Disconnected,
        }
    }
}

/// Setup-time errors: the declared contract and the registered code
/// disagree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The same request or message type was declared twice in one
    /// contract.
    #[error("{0} is declared more than once")]
    DuplicateRequest(&'static str),

    /// A second handler was registered for the same type.
    #[error("a handler for {0} is already registered")]
    DuplicateHandler(&'static str),

    /// A declared operation has no handler.
    #[error("no handler registered for declared operation {0}")]
    MissingHandler(&'static str),

    /// A handler or call handle refers to an operation the contract does
    /// not declare (or declares with the other kind).
    #[error("{0} is not declared by the contract")]
    UndeclaredOperation(&'static str),

    /// An rpc is declared with a different response type.
    #[error("{request} is declared to answer with {declared}, not {requested}")]
    ResponseMismatch {
        /// The request type.
        request: &'static str,
        /// The response type in the contract.
        declared: &'static str,
        /// The response type the code asked for.
        requested: &'static str,
    },
}
