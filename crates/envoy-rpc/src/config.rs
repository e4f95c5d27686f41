use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Configuration for a [`Peer`](crate::Peer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// How long a call waits for its response. Default: 5 seconds.
    /// Individual handles can override it with
    /// [`RpcDef::with_timeout`](crate::RpcDef::with_timeout).
    pub call_timeout: Duration,
    /// Pause after a failed receive before trying again. Default: 10 ms.
    pub recv_retry_backoff: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            recv_retry_backoff: Duration::from_millis(10),
        }
    }
}

impl PeerConfig {
    /// Shortest receive backoff; anything lower would spin.
    pub const MIN_RECV_RETRY_BACKOFF: Duration = Duration::from_millis(1);

    /// A config with a different call timeout.
    pub fn with_call_timeout(call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            ..Default::default()
        }
    }

    /// Fixes out-of-range values so the config is safe to use.
    ///
    /// - A zero `call_timeout` falls back to the default.
    /// - `recv_retry_backoff` raised to [`Self::MIN_RECV_RETRY_BACKOFF`].
    pub fn validated(mut self) -> Self {
        if self.call_timeout.is_zero() {
            warn!("call_timeout is zero, using default");
            self.call_timeout = Self::default().call_timeout;
        }
        if self.recv_retry_backoff < Self::MIN_RECV_RETRY_BACKOFF {
            self.recv_retry_backoff = Self::MIN_RECV_RETRY_BACKOFF;
        }
        self
    }
}
