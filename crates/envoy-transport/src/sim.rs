//! Fault injection for sockets: packet loss and send latency.
//!
//! [`SimSocket`] wraps any [`Socket`] and degrades it according to a
//! [`SimConfig`]. It exists for resilience tests; nothing in the normal
//! data path uses it.
//!
//! - **Send**: dropped with probability `packet_loss` (the caller still
//!   sees success). Otherwise, when a delay range is configured, the send
//!   happens on a spawned task after a uniformly sampled delay.
//! - **Recv**: a received message is dropped with probability
//!   `packet_loss` and reported like a keepalive.
//!
//! Deferred sends can fail after the caller has moved on. Those errors go
//! into a small queue. The next `send` still goes out, then returns the
//! oldest queued error in place of its own result. When the queue is full
//! new errors are logged and lost.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{SimConfig, Socket, SocketState, TransportError};

/// Capacity of the deferred-send error queue.
const ERROR_QUEUE_CAPACITY: usize = 10;

/// A [`Socket`] decorator that drops and delays traffic.
pub struct SimSocket<S> {
    inner: Arc<S>,
    config: SimConfig,
    rng: Mutex<StdRng>,
    errors_tx: mpsc::Sender<TransportError>,
    errors_rx: Mutex<mpsc::Receiver<TransportError>>,
}

impl<S: Socket> SimSocket<S> {
    /// Wraps `inner`. The config is validated first.
    pub fn new(inner: S, config: SimConfig) -> Self {
        let config = config.validated();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_QUEUE_CAPACITY);

        debug!(
            packet_loss = config.packet_loss,
            min_delay = ?config.min_delay,
            max_delay = ?config.max_delay,
            "fault injection enabled"
        );

        Self {
            inner: Arc::new(inner),
            config,
            rng: Mutex::new(rng),
            errors_tx,
            errors_rx: Mutex::new(errors_rx),
        }
    }

    /// The wrapped socket.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// The effective (validated) configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Samples whether the next packet is lost.
    pub(crate) fn roll_drop(&self) -> bool {
        let loss = self.config.packet_loss;
        if loss <= 0.0 {
            return false;
        }
        self.rng.lock().random::<f64>() < loss
    }

    fn sample_delay(&self) -> Option<Duration> {
        if !self.config.has_delay() {
            return None;
        }
        let min = self.config.min_delay;
        let max = self.config.max_delay;
        if min == max {
            return Some(max);
        }
        let span = (max - min).as_nanos() as u64;
        let offset = self.rng.lock().random_range(0..=span);
        Some(min + Duration::from_nanos(offset))
    }

    fn take_deferred_error(&self) -> Option<TransportError> {
        self.errors_rx.lock().try_recv().ok()
    }

    async fn send_degraded(&self, msg: S::Message) -> Result<(), TransportError> {
        if self.roll_drop() {
            trace!("simulated packet loss on send");
            return Ok(());
        }

        let Some(delay) = self.sample_delay() else {
            return self.inner.send(msg).await;
        };

        let inner = Arc::clone(&self.inner);
        let errors = self.errors_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = inner.send(msg).await {
                if let Err(mpsc::error::TrySendError::Full(e)) = errors.try_send(e) {
                    debug!(error = %e, "deferred send error dropped, queue full");
                }
            }
        });
        Ok(())
    }
}

impl<S: Socket> Socket for SimSocket<S> {
    type Message = S::Message;

    async fn send(&self, msg: S::Message) -> Result<(), TransportError> {
        // Only errors queued by earlier sends are reported here.
        let deferred = self.take_deferred_error();
        let sent = self.send_degraded(msg).await;
        match deferred {
            Some(e) => Err(e),
            None => sent,
        }
    }

    async fn recv(&self) -> Result<Option<S::Message>, TransportError> {
        let msg = self.inner.recv().await?;
        if msg.is_some() && self.roll_drop() {
            trace!("simulated packet loss on recv");
            return Ok(None);
        }
        Ok(msg)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await
    }

    fn state(&self) -> SocketState {
        self.inner.state()
    }
}

#[cfg(test)]
mod tests {
    use envoy_protocol::RawSerdes;

    use super::*;
    use crate::{memory_pipe, MemoryPipe, PipeSocket, SocketConfig};

    fn sim(config: SimConfig) -> SimSocket<PipeSocket<MemoryPipe, RawSerdes>> {
        let (pipe, _other) = memory_pipe();
        let socket = PipeSocket::accepted(pipe, RawSerdes, SocketConfig::default());
        SimSocket::new(socket, config)
    }

    #[test]
    fn test_roll_drop_same_seed_same_decisions() {
        let a = sim(SimConfig::with_loss(0.5).seeded(42));
        let b = sim(SimConfig::with_loss(0.5).seeded(42));

        let rolls_a: Vec<bool> = (0..64).map(|_| a.roll_drop()).collect();
        let rolls_b: Vec<bool> = (0..64).map(|_| b.roll_drop()).collect();

        assert_eq!(rolls_a, rolls_b);
        assert!(rolls_a.iter().any(|&d| d));
        assert!(rolls_a.iter().any(|&d| !d));
    }

    #[test]
    fn test_roll_drop_extremes() {
        let never = sim(SimConfig::with_loss(0.0).seeded(1));
        let always = sim(SimConfig::with_loss(1.0).seeded(1));

        assert!((0..100).all(|_| !never.roll_drop()));
        assert!((0..100).all(|_| always.roll_drop()));
    }

    #[test]
    fn test_sample_delay_stays_in_range() {
        let s = sim(SimConfig::with_delay(
            Duration::from_millis(5),
            Duration::from_millis(15),
        )
        .seeded(7));

        for _ in 0..100 {
            let d = s.sample_delay().unwrap();
            assert!(d >= Duration::from_millis(5));
            assert!(d <= Duration::from_millis(15));
        }
    }

    #[test]
    fn test_sample_delay_none_without_range() {
        let s = sim(SimConfig::default());
        assert_eq!(s.sample_delay(), None);
    }
}
