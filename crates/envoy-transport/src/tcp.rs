//! TCP pipes with a 4-byte big-endian length prefix per frame.
//!
//! ```text
//! ┌────────────┬──────────────────────┐
//! │ len: u32be │ payload (len bytes)  │
//! └────────────┴──────────────────────┘
//! ```
//!
//! A zero-length frame carries no payload and is read back as a keepalive.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::signal::CloseSignal;
use crate::{ConnectionId, Dialer, Listener, Pipe, TransportError};

/// A length-prefixed frame pipe over one TCP stream.
pub struct TcpPipe {
    id: ConnectionId,
    peer_addr: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: CloseSignal,
}

impl TcpPipe {
    /// Wraps an established stream.
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        let peer_addr = stream.peer_addr().map_err(TransportError::Network)?;
        stream.set_nodelay(true).map_err(TransportError::Network)?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            id: ConnectionId::next(),
            peer_addr,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CloseSignal::new(),
        })
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn read_frame(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut reader = self.reader.lock().await;

        let len = reader.read_u32().await.map_err(read_error)? as usize;
        if len == 0 {
            return Ok(0);
        }
        if len > buf.len() {
            return Err(TransportError::FrameTooLarge {
                size: len,
                limit: buf.len(),
            });
        }

        reader
            .read_exact(&mut buf[..len])
            .await
            .map_err(read_error)?;
        Ok(len)
    }
}

fn read_error(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::ConnectionClosed("peer closed the stream".into())
    } else {
        TransportError::Network(e)
    }
}

impl Pipe for TcpPipe {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed.is_fired() {
            return Err(TransportError::ConnectionClosed("pipe closed".into()));
        }
        tokio::select! {
            _ = self.closed.fired() => {
                Err(TransportError::ConnectionClosed("pipe closed".into()))
            }
            result = self.read_frame(buf) => result,
        }
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let len = u32::try_from(data.len()).map_err(|_| {
            TransportError::FrameTooLarge {
                size: data.len(),
                limit: u32::MAX as usize,
            }
        })?;

        let mut frame = Vec::with_capacity(4 + data.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(data);

        self.writer
            .lock()
            .await
            .write_all(&frame)
            .await
            .map_err(TransportError::Network)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.fire();
        match self.writer.lock().await.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::Network(e)),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

// ---------------------------------------------------------------------------
// Listener / dialer
// ---------------------------------------------------------------------------

/// Accepts TCP connections as [`TcpPipe`]s.
pub struct TcpPipeListener {
    listener: TcpListener,
}

impl TcpPipeListener {
    /// Binds to the given address. Use port 0 to let the OS pick one.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        info!(addr, "TCP pipe listener bound");
        Ok(Self { listener })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(TransportError::AcceptFailed)
    }
}

impl Listener for TcpPipeListener {
    type Pipe = TcpPipe;

    async fn accept(&mut self) -> Result<TcpPipe, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        let pipe = TcpPipe::new(stream)?;
        debug!(id = %pipe.id(), %addr, "accepted TCP pipe");
        Ok(pipe)
    }
}

/// Dials a fixed TCP address. Redials go to the same address.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
}

impl TcpDialer {
    /// Creates a dialer for `addr` (anything `TcpStream::connect` accepts).
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// The dialed address.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Dialer for TcpDialer {
    type Pipe = TcpPipe;

    async fn dial(&self) -> Result<TcpPipe, TransportError> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                TransportError::ConnectionRefused(self.addr.clone())
            } else {
                TransportError::Network(e)
            }
        })?;
        let pipe = TcpPipe::new(stream)?;
        debug!(id = %pipe.id(), addr = %self.addr, "dialed TCP pipe");
        Ok(pipe)
    }
}
