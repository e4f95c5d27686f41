//! # Envoy
//!
//! Typed, bidirectional RPC and messaging over reconnecting sockets.
//!
//! Both ends of a connection are peers: each serves one contract and
//! calls the other, over a single socket that can redial on its own. The
//! stack has three layers, each in its own crate and re-exported here:
//!
//! - **protocol**: wire envelopes, tagged-union payload codecs.
//! - **transport**: framed pipes (memory, TCP, WebSocket), the
//!   reconnecting [`PipeSocket`], and the fault-injecting [`SimSocket`].
//! - **rpc**: contracts, handlers, peers, and typed call handles.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use envoy::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Add { x: i64, y: i64 }
//!
//! struct Calculator;
//!
//! impl ServiceShape for Calculator {
//!     fn declare<C: Codec + Clone>(service: ServiceBuilder<C>) -> ServiceBuilder<C> {
//!         service.rpc::<Add, i64>()
//!     }
//! }
//!
//! # async fn run() -> Result<(), EnvoyError> {
//! let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec)?;
//! let socket = PipeSocket::dial(
//!     TcpDialer::new("127.0.0.1:7000"),
//!     EnvelopeSerdes::new(JsonCodec),
//!     SocketConfig::default(),
//! )
//! .await?;
//!
//! let peer = iface.client().connect(socket)?;
//! let sum = peer.rpc::<Add, i64>()?.call(Add { x: 2, y: 3 }).await?;
//! assert_eq!(sum, 5);
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::EnvoyError;

pub use envoy_protocol::{
    AnyPayload, Codec, DecodedPayload, Envelope, EnvelopeSerdes, Payload, ProtocolError,
    RawSerdes, Serdes, UnionBuilder, UnionCodec,
};
#[cfg(feature = "json")]
pub use envoy_protocol::JsonCodec;

pub use envoy_transport::{
    memory_listener, memory_pipe, ConnectionId, Dialer, Listener, MemoryDialer, MemoryListener,
    MemoryPipe, Pipe, PipeSocket, SimConfig, SimSocket, Socket, SocketConfig, SocketState,
    TcpDialer, TcpPipe, TcpPipeListener, TransportError,
};
#[cfg(feature = "websocket")]
pub use envoy_transport::{
    ClientWebSocketPipe, ServerWebSocketPipe, WebSocketDialer, WebSocketListener, WebSocketPipe,
};

pub use envoy_rpc::{
    ConfigError, InterfaceDef, MsgDef, NoService, Operation, OperationKind, Peer, PeerBuilder,
    PeerConfig, RpcDef, RpcError, ServiceBuilder, ServiceDefinition, ServiceShape,
};

/// The types most applications need, in one import.
pub mod prelude {
    pub use crate::{
        Codec, EnvelopeSerdes, EnvoyError, InterfaceDef, MsgDef, NoService, Peer, PeerConfig,
        PipeSocket, RpcDef, ServiceBuilder, ServiceDefinition, ServiceShape, SimConfig,
        SimSocket, Socket, SocketConfig, TcpDialer, TcpPipeListener,
    };
    pub use crate::{Dialer, Listener};

    #[cfg(feature = "json")]
    pub use crate::JsonCodec;

    #[cfg(feature = "websocket")]
    pub use crate::{WebSocketDialer, WebSocketListener};
}
