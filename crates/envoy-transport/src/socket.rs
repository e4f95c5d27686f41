//! A typed, reconnecting socket on top of a [`Pipe`].
//!
//! ```text
//!                 dial ok / redial ok
//!   ┌──────────────┐ ───────────────► ┌───────────┐
//!   │ Disconnected │                  │ Connected │
//!   └──────────────┘ ◄─────────────── └───────────┘
//!          │         read/write fails        │
//!          │                                 │
//!          └────────── close() ──────────────┴──► Closed (terminal)
//! ```
//!
//! A socket made by [`PipeSocket::dial`] keeps a background task that
//! redials at a fixed interval whenever the pipe drops, forever, until
//! the socket is closed. A socket made by [`PipeSocket::accepted`] has no
//! way to reach its peer again, so losing the pipe closes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use envoy_protocol::Serdes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{Dialer, Pipe, Socket, SocketConfig, SocketState, TransportError};

/// A [`Socket`] that owns a pipe and a serializer.
pub struct PipeSocket<P, S> {
    inner: Arc<Shared<P, S>>,
}

struct Shared<P, S> {
    serdes: S,
    config: SocketConfig,
    /// Dial-created sockets redial; accepted sockets close instead.
    redials: bool,
    pipe: Mutex<Option<Arc<P>>>,
    connected: AtomicBool,
    closed: AtomicBool,
    send_lock: tokio::sync::Mutex<()>,
    recv_buf: tokio::sync::Mutex<Vec<u8>>,
    redial_signal: Arc<Notify>,
    redial_task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Pipe, S: Serdes> Shared<P, S> {
    fn new(serdes: S, config: SocketConfig, redials: bool) -> Self {
        let recv_buf = vec![0; config.recv_buffer_size];
        Self {
            serdes,
            config,
            redials,
            pipe: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            send_lock: tokio::sync::Mutex::new(()),
            recv_buf: tokio::sync::Mutex::new(recv_buf),
            redial_signal: Arc::new(Notify::new()),
            redial_task: Mutex::new(None),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The live pipe, or `None` while disconnected.
    fn current_pipe(&self) -> Option<Arc<P>> {
        if !self.is_connected() {
            return None;
        }
        self.pipe.lock().clone()
    }

    /// Installs a freshly dialed or accepted pipe.
    ///
    /// Returns the pipe back if the socket was closed in the meantime.
    fn connect_transport(&self, pipe: P) -> Option<Arc<P>> {
        let pipe = Arc::new(pipe);
        {
            let mut slot = self.pipe.lock();
            if self.is_closed() {
                return Some(pipe);
            }
            *slot = Some(Arc::clone(&pipe));
            self.connected.store(true, Ordering::Release);
        }
        info!(id = %pipe.id(), "socket connected");
        None
    }

    /// Detaches `failed` if it is still the live pipe, then either asks the
    /// redial task for a new one or closes the socket.
    async fn disconnect_transport(&self, failed: &Arc<P>) {
        let taken = {
            let mut slot = self.pipe.lock();
            let is_current = slot
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, failed));
            if is_current {
                self.connected.store(false, Ordering::Release);
                slot.take()
            } else {
                None
            }
        };
        let Some(pipe) = taken else {
            return;
        };

        if self.redials {
            info!(id = %pipe.id(), "socket disconnected, scheduling redial");
            self.redial_signal.notify_one();
        } else {
            info!(id = %pipe.id(), "accepted socket lost its pipe, closing");
            self.closed.store(true, Ordering::Release);
        }

        if let Err(e) = pipe.close().await {
            debug!(id = %pipe.id(), error = %e, "closing failed pipe");
        }
    }
}

impl<P, S> Drop for Shared<P, S> {
    fn drop(&mut self) {
        if let Some(task) = self.redial_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Waits for disconnect signals and dials until a pipe is back.
///
/// Holds only a weak reference between attempts so dropping the socket
/// ends the loop.
async fn redial_loop<D, S>(
    shared: Weak<Shared<D::Pipe, S>>,
    signal: Arc<Notify>,
    dialer: D,
    interval: Duration,
) where
    D: Dialer,
    S: Serdes,
{
    loop {
        signal.notified().await;

        loop {
            tokio::time::sleep(interval).await;

            let Some(shared) = shared.upgrade() else {
                return;
            };
            if shared.is_closed() {
                return;
            }
            if shared.is_connected() {
                break;
            }

            match dialer.dial().await {
                Ok(pipe) => {
                    if let Some(stale) = shared.connect_transport(pipe) {
                        let _ = stale.close().await;
                        return;
                    }
                    break;
                }
                Err(e) => debug!(error = %e, "redial failed, retrying"),
            }
        }
    }
}

impl<P: Pipe, S: Serdes> PipeSocket<P, S> {
    /// Dials a pipe and returns a socket that redials whenever it drops.
    ///
    /// # Errors
    /// Whatever the first dial returns. Only later failures are retried.
    pub async fn dial<D>(
        dialer: D,
        serdes: S,
        config: SocketConfig,
    ) -> Result<Self, TransportError>
    where
        D: Dialer<Pipe = P>,
    {
        let config = config.validated();
        let pipe = dialer.dial().await?;

        let inner = Arc::new(Shared::new(serdes, config, true));
        inner.connect_transport(pipe);

        let task = tokio::spawn(redial_loop(
            Arc::downgrade(&inner),
            Arc::clone(&inner.redial_signal),
            dialer,
            inner.config.redial_interval,
        ));
        *inner.redial_task.lock() = Some(task);

        Ok(Self { inner })
    }

    /// Wraps a pipe produced by a listener. Never redials.
    pub fn accepted(pipe: P, serdes: S, config: SocketConfig) -> Self {
        let inner = Arc::new(Shared::new(serdes, config.validated(), false));
        inner.connect_transport(pipe);
        Self { inner }
    }

    /// The serializer this socket applies to every frame.
    pub fn serdes(&self) -> &S {
        &self.inner.serdes
    }

    /// The effective (validated) configuration.
    pub fn config(&self) -> &SocketConfig {
        &self.inner.config
    }

    /// Whether this socket redials on its own.
    pub fn redials(&self) -> bool {
        self.inner.redials
    }
}

impl<P: Pipe, S: Serdes> Socket for PipeSocket<P, S> {
    type Message = S::Message;

    async fn send(&self, msg: S::Message) -> Result<(), TransportError> {
        let shared = &self.inner;
        if shared.is_closed() {
            return Err(TransportError::Closed);
        }
        let Some(pipe) = shared.current_pipe() else {
            return Err(TransportError::Disconnected);
        };

        let bytes = shared.serdes.marshal(&msg)?;
        // Frames are capped at the receive buffer size on both ends.
        let limit = shared.config.recv_buffer_size;
        if bytes.len() > limit {
            return Err(TransportError::FrameTooLarge {
                size: bytes.len(),
                limit,
            });
        }

        let _guard = shared.send_lock.lock().await;
        if let Err(e) = pipe.write(&bytes).await {
            shared.disconnect_transport(&pipe).await;
            return Err(e.into_write_error());
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<S::Message>, TransportError> {
        let shared = &self.inner;
        if shared.is_closed() {
            return Err(TransportError::Closed);
        }
        let Some(pipe) = shared.current_pipe() else {
            return Err(TransportError::Disconnected);
        };

        let mut buf = shared.recv_buf.lock().await;
        let n = match pipe.read(buf.as_mut_slice()).await {
            Ok(n) => n,
            Err(e) => {
                shared.disconnect_transport(&pipe).await;
                return Err(e.into_network());
            }
        };

        if n == 0 {
            return Ok(None);
        }
        let msg = shared.serdes.unmarshal(&buf[..n])?;
        Ok(Some(msg))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let shared = &self.inner;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(task) = shared.redial_task.lock().take() {
            task.abort();
        }
        shared.connected.store(false, Ordering::Release);

        let pipe = shared.pipe.lock().take();
        match pipe {
            Some(pipe) => {
                info!(id = %pipe.id(), "socket closed");
                pipe.close().await
            }
            None => {
                info!("socket closed while disconnected");
                Ok(())
            }
        }
    }

    fn state(&self) -> SocketState {
        if self.inner.is_closed() {
            SocketState::Closed
        } else if self.inner.is_connected() {
            SocketState::Connected
        } else {
            SocketState::Disconnected
        }
    }
}
