use envoy_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket was explicitly closed and will never carry traffic again.
    #[error("socket closed")]
    Closed,

    /// The socket is between transports (e.g. waiting for a redial).
    #[error("socket disconnected")]
    Disconnected,

    /// The remote end finished the stream.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Reading or writing the underlying transport failed.
    #[error("network error: {0}")]
    Network(#[source] std::io::Error),

    /// A frame could not be marshalled or unmarshalled.
    #[error("serialization error: {0}")]
    Serdes(#[from] ProtocolError),

    /// A frame did not fit the receive buffer or the length prefix.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Largest frame that fits.
        limit: usize,
    },

    /// Nobody is listening at the dialed address.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),
}

impl TransportError {
    /// Whether this error means the remote end finished the stream.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_))
    }

    /// Folds a read failure into the shape sockets report to callers:
    /// end of stream passes through, everything else becomes `Network`.
    pub(crate) fn into_network(self) -> Self {
        match self {
            Self::ConnectionClosed(_) | Self::Network(_) => self,
            other => Self::Network(std::io::Error::other(other)),
        }
    }

    /// Folds a write failure into `Network`, including end of stream.
    pub(crate) fn into_write_error(self) -> Self {
        match self {
            Self::Network(_) => self,
            Self::ConnectionClosed(reason) => Self::Network(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                reason,
            )),
            other => Self::Network(std::io::Error::other(other)),
        }
    }
}
