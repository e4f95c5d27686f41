//! Unified error type for the Envoy stack.

use envoy_protocol::ProtocolError;
use envoy_rpc::{ConfigError, RpcError};
use envoy_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// Lets application code use `?` across setup (contracts, dialing,
/// handler registration) and calls without naming each sub-crate's error.
#[derive(Debug, thiserror::Error)]
pub enum EnvoyError {
    /// Framing, connection, or socket lifecycle failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Payload encode or decode failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A call or message failed at runtime.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Contracts and handlers don't line up.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
