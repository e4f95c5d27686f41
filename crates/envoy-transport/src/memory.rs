//! In-process pipes backed by tokio channels.
//!
//! Used by tests and by anything that wants two peers in one process
//! without touching the network. [`memory_listener`] adds a dial/accept
//! pair whose dialer can be switched off to simulate an unreachable
//! remote.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::signal::CloseSignal;
use crate::{ConnectionId, Dialer, Listener, Pipe, TransportError};

/// One end of an in-memory pipe.
pub struct MemoryPipe {
    id: ConnectionId,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: CloseSignal,
}

/// Creates a connected pair of in-memory pipes.
pub fn memory_pipe() -> (MemoryPipe, MemoryPipe) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (MemoryPipe::new(a_tx, a_rx), MemoryPipe::new(b_tx, b_rx))
}

impl MemoryPipe {
    fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            closed: CloseSignal::new(),
        }
    }
}

fn copy_frame(frame: &[u8], buf: &mut [u8]) -> Result<usize, TransportError> {
    if frame.len() > buf.len() {
        return Err(TransportError::FrameTooLarge {
            size: frame.len(),
            limit: buf.len(),
        });
    }
    buf[..frame.len()].copy_from_slice(frame);
    Ok(frame.len())
}

impl Pipe for MemoryPipe {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed.is_fired() {
            return Err(TransportError::ConnectionClosed("pipe closed".into()));
        }

        let frame = tokio::select! {
            _ = self.closed.fired() => None,
            frame = async { self.rx.lock().await.recv().await } => frame,
        };

        match frame {
            Some(frame) => copy_frame(&frame, buf),
            None => Err(TransportError::ConnectionClosed(
                "memory pipe hung up".into(),
            )),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(TransportError::ConnectionClosed("pipe closed".into()));
        };
        tx.send(data.to_vec()).map_err(|_| {
            TransportError::ConnectionClosed("memory pipe hung up".into())
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the sender is what the other end sees as end of stream.
        self.tx.lock().take();
        self.closed.fire();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

// ---------------------------------------------------------------------------
// Listener / dialer
// ---------------------------------------------------------------------------

/// Accepting side of [`memory_listener`].
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPipe>,
}

/// Dialing side of [`memory_listener`]. Clones share the reachability gate.
#[derive(Clone)]
pub struct MemoryDialer {
    incoming: mpsc::UnboundedSender<MemoryPipe>,
    reachable: Arc<AtomicBool>,
}

/// Creates an in-memory listener and a dialer that connects to it.
pub fn memory_listener() -> (MemoryListener, MemoryDialer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryListener { incoming: rx },
        MemoryDialer {
            incoming: tx,
            reachable: Arc::new(AtomicBool::new(true)),
        },
    )
}

impl MemoryDialer {
    /// Opens or shuts the gate. While shut, every dial is refused.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Whether dials currently go through.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }
}

impl Dialer for MemoryDialer {
    type Pipe = MemoryPipe;

    async fn dial(&self) -> Result<MemoryPipe, TransportError> {
        if !self.is_reachable() {
            return Err(TransportError::ConnectionRefused(
                "memory listener unreachable".into(),
            ));
        }

        let (local, remote) = memory_pipe();
        self.incoming.send(remote).map_err(|_| {
            TransportError::ConnectionRefused("memory listener dropped".into())
        })?;
        debug!(id = %local.id(), "dialed memory pipe");
        Ok(local)
    }
}

impl Listener for MemoryListener {
    type Pipe = MemoryPipe;

    async fn accept(&mut self) -> Result<MemoryPipe, TransportError> {
        let pipe = self.incoming.recv().await.ok_or_else(|| {
            TransportError::AcceptFailed(std::io::Error::other(
                "every memory dialer was dropped",
            ))
        })?;
        debug!(id = %pipe.id(), "accepted memory pipe");
        Ok(pipe)
    }
}
