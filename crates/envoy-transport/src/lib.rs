//! Transport layer for Envoy.
//!
//! Two levels of abstraction live here:
//!
//! - **Pipes** ([`Pipe`], [`Dialer`], [`Listener`]) move whole frames of
//!   bytes. Implementations: in-memory ([`memory_pipe`],
//!   [`memory_listener`]), length-prefixed TCP ([`TcpPipe`]) and WebSocket
//!   ([`WebSocketPipe`]).
//! - **Sockets** ([`Socket`]) move typed messages. [`PipeSocket`] owns a
//!   pipe plus a [`Serdes`](envoy_protocol::Serdes) and manages the
//!   connected/disconnected/closed lifecycle, including automatic redial.
//!   [`SimSocket`] wraps any socket and injects packet loss and latency.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket pipes via `tokio-tungstenite`

mod config;
mod error;
mod memory;
mod signal;
mod sim;
mod socket;
mod tcp;
#[cfg(feature = "websocket")]
mod websocket;

pub use config::{SimConfig, SocketConfig};
pub use error::TransportError;
pub use memory::{memory_listener, memory_pipe, MemoryDialer, MemoryListener, MemoryPipe};
pub use sim::SimSocket;
pub use socket::PipeSocket;
pub use tcp::{TcpDialer, TcpPipe, TcpPipeListener};
#[cfg(feature = "websocket")]
pub use websocket::{
    ClientWebSocketPipe, ServerWebSocketPipe, WebSocketDialer, WebSocketListener,
    WebSocketPipe,
};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a pipe. Shows up in every transport log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Pipes
// ---------------------------------------------------------------------------

/// A bidirectional, message-framed byte pipe.
///
/// Every `write` produces exactly one frame and every successful `read`
/// returns exactly one frame, so the layers above never deal with partial
/// messages.
pub trait Pipe: Send + Sync + 'static {
    /// Reads the next frame into `buf` and returns its length.
    ///
    /// `Ok(0)` is a keepalive: the transport saw traffic but there is no
    /// message. End of stream is `Err(TransportError::ConnectionClosed)`.
    fn read(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<usize, TransportError>> + Send;

    /// Writes `data` as one frame. An empty slice sends a keepalive.
    fn write(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the pipe. Pending and future reads fail.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this pipe.
    fn id(&self) -> ConnectionId;
}

/// Establishes outgoing pipes. Called again on every redial.
pub trait Dialer: Send + Sync + 'static {
    /// The pipe type produced by this dialer.
    type Pipe: Pipe;

    /// Opens a new pipe to the remote end.
    fn dial(&self) -> impl Future<Output = Result<Self::Pipe, TransportError>> + Send;
}

/// Accepts incoming pipes.
pub trait Listener: Send + 'static {
    /// The pipe type produced by this listener.
    type Pipe: Pipe;

    /// Waits for and accepts the next incoming pipe.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Pipe, TransportError>> + Send;
}

// ---------------------------------------------------------------------------
// Sockets
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`Socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// A transport is attached and traffic can flow.
    Connected,
    /// No transport right now; a dialing socket is trying to get one back.
    Disconnected,
    /// Terminal. Never becomes `Connected` again.
    Closed,
}

/// A duplex channel of typed messages.
pub trait Socket: Send + Sync + 'static {
    /// The message type carried by this socket.
    type Message: Send + 'static;

    /// Sends one message.
    ///
    /// Fails fast with `Closed` or `Disconnected` when there is no
    /// transport to write to. A write failure surfaces as `Network`.
    fn send(
        &self,
        msg: Self::Message,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next message. `Ok(None)` is a keepalive.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Self::Message>, TransportError>> + Send;

    /// Closes the socket for good. Closing twice is not an error.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Current lifecycle state.
    fn state(&self) -> SocketState;

    /// Whether a transport is attached right now.
    fn is_connected(&self) -> bool {
        self.state() == SocketState::Connected
    }

    /// Whether the socket has reached its terminal state.
    fn is_closed(&self) -> bool {
        self.state() == SocketState::Closed
    }
}
