//! Socket and fault-injection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// SocketConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`PipeSocket`](crate::PipeSocket).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Fixed pause between redial attempts. Default: 1 second.
    pub redial_interval: Duration,
    /// Size of the receive buffer, i.e. the largest frame `recv` accepts.
    /// `send` refuses larger frames, so both ends should agree on it.
    /// Default: 64 KiB.
    pub recv_buffer_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            redial_interval: Duration::from_secs(1),
            recv_buffer_size: 64 * 1024,
        }
    }
}

impl SocketConfig {
    /// Shortest redial interval a socket will use.
    pub const MIN_REDIAL_INTERVAL: Duration = Duration::from_millis(1);

    /// Fixes out-of-range values so the config is safe to use.
    ///
    /// - `redial_interval` raised to [`Self::MIN_REDIAL_INTERVAL`].
    /// - A zero `recv_buffer_size` falls back to the default.
    pub fn validated(mut self) -> Self {
        if self.redial_interval < Self::MIN_REDIAL_INTERVAL {
            warn!(
                interval = ?self.redial_interval,
                "redial_interval too short, raising to minimum"
            );
            self.redial_interval = Self::MIN_REDIAL_INTERVAL;
        }
        if self.recv_buffer_size == 0 {
            warn!("recv_buffer_size is zero, using default");
            self.recv_buffer_size = Self::default().recv_buffer_size;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`SimSocket`](crate::SimSocket).
///
/// The default injects no faults at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Probability (0.0–1.0) that any single send or receive is dropped.
    pub packet_loss: f64,
    /// Lower bound of the artificial send delay.
    pub min_delay: Duration,
    /// Upper bound of the artificial send delay. Zero disables delays.
    pub max_delay: Duration,
    /// Seed for the drop/delay sampler. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl SimConfig {
    /// A config that only drops packets.
    pub fn with_loss(packet_loss: f64) -> Self {
        Self {
            packet_loss,
            ..Default::default()
        }
    }

    /// A config that only delays sends, uniformly within `min..=max`.
    pub fn with_delay(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Same config with a fixed sampler seed.
    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Clamps `packet_loss` to `0.0..=1.0` (NaN becomes 0) and swaps the
    /// delay bounds if they are reversed.
    pub fn validated(mut self) -> Self {
        if self.packet_loss.is_nan() {
            self.packet_loss = 0.0;
        }
        self.packet_loss = self.packet_loss.clamp(0.0, 1.0);
        if self.min_delay > self.max_delay {
            warn!(
                min = ?self.min_delay,
                max = ?self.max_delay,
                "min_delay exceeds max_delay, swapping"
            );
            std::mem::swap(&mut self.min_delay, &mut self.max_delay);
        }
        self
    }

    /// Whether sends should be deferred at all.
    pub fn has_delay(&self) -> bool {
        !self.max_delay.is_zero()
    }
}
