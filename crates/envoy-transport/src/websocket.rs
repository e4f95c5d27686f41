//! WebSocket pipes using `tokio-tungstenite`.
//!
//! Each binary (or text) WebSocket message is one frame. Ping and pong
//! control frames are reported as keepalives.

use std::net::SocketAddr;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::signal::CloseSignal;
use crate::{ConnectionId, Dialer, Listener, Pipe, TransportError};

/// Pipe produced by [`WebSocketListener`].
pub type ServerWebSocketPipe = WebSocketPipe<TcpStream>;

/// Pipe produced by [`WebSocketDialer`].
pub type ClientWebSocketPipe = WebSocketPipe<MaybeTlsStream<TcpStream>>;

/// A frame pipe over one WebSocket connection.
pub struct WebSocketPipe<T> {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocketStream<T>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<T>>>,
    closed: CloseSignal,
}

impl<T> WebSocketPipe<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an established WebSocket.
    pub fn new(ws: WebSocketStream<T>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::next(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CloseSignal::new(),
        }
    }

    async fn read_frame(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let msg = self.stream.lock().await.next().await;
        let data = match msg {
            Some(Ok(Message::Binary(data))) => data.to_vec(),
            Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                return Ok(0);
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(TransportError::ConnectionClosed(
                    "websocket closed".into(),
                ));
            }
            Some(Err(e)) => {
                return Err(TransportError::Network(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    e,
                )));
            }
        };

        if data.len() > buf.len() {
            return Err(TransportError::FrameTooLarge {
                size: data.len(),
                limit: buf.len(),
            });
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl<T> Pipe for WebSocketPipe<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
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
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::Network(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.fire();
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::Network(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

// ---------------------------------------------------------------------------
// Listener / dialer
// ---------------------------------------------------------------------------

/// Accepts WebSocket connections as [`ServerWebSocketPipe`]s.
pub struct WebSocketListener {
    listener: TcpListener,
}

impl WebSocketListener {
    /// Binds to the given address. Use port 0 to let the OS pick one.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        info!(addr, "WebSocket listener bound");
        Ok(Self { listener })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(TransportError::AcceptFailed)
    }
}

impl Listener for WebSocketListener {
    type Pipe = ServerWebSocketPipe;

    async fn accept(&mut self) -> Result<ServerWebSocketPipe, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
            TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let pipe = WebSocketPipe::new(ws);
        debug!(id = %pipe.id(), %addr, "accepted WebSocket pipe");
        Ok(pipe)
    }
}

/// Dials a fixed WebSocket URL (`ws://host:port/...`).
#[derive(Debug, Clone)]
pub struct WebSocketDialer {
    url: String,
}

impl WebSocketDialer {
    /// Creates a dialer for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Dialer for WebSocketDialer {
    type Pipe = ClientWebSocketPipe;

    async fn dial(&self) -> Result<ClientWebSocketPipe, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| {
                TransportError::ConnectionRefused(format!("{}: {e}", self.url))
            })?;

        let pipe = WebSocketPipe::new(ws);
        debug!(id = %pipe.id(), url = %self.url, "dialed WebSocket pipe");
        Ok(pipe)
    }
}
