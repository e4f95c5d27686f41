//! Typed, bidirectional RPC and messaging over an Envoy socket.
//!
//! Each end of a connection is a [`Peer`]. A peer serves one contract
//! (the requests it answers) and calls another (the requests its remote
//! answers), so both sides can make calls over the same connection.
//!
//! # Setup
//!
//! 1. Declare the contracts with [`ServiceBuilder`] or [`ServiceShape`]
//!    and pair them in an [`InterfaceDef`].
//! 2. Take a [`PeerBuilder`] from [`InterfaceDef::server`] or
//!    [`InterfaceDef::client`], register a handler for every operation
//!    you serve, and [`connect`](PeerBuilder::connect) it to a socket.
//! 3. Ask the peer for typed handles ([`Peer::rpc`], [`Peer::message`])
//!    and use them from any task.
//!
//! Every mismatch between contracts and code shows up as a
//! [`ConfigError`] during setup. Once traffic flows, only [`RpcError`]s
//! remain.

mod config;
mod descriptor;
mod error;
mod handler;
mod peer;
mod service;

pub use config::PeerConfig;
pub use descriptor::{MsgDef, RpcDef};
pub use error::{ConfigError, RpcError};
pub use peer::{Peer, PeerBuilder};
pub use service::{
    InterfaceDef, NoService, Operation, OperationKind, ServiceBuilder, ServiceDefinition,
    ServiceShape,
};
