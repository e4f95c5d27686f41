//! Typed call handles.
//!
//! [`RpcDef`] and [`MsgDef`] are what application code holds on to. They
//! carry no wire state of their own: each is bound to one peer and turns
//! a typed call into the peer's untyped request path.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use envoy_protocol::{AnyPayload, DecodedPayload, Payload};
use futures_util::future::BoxFuture;

use crate::RpcError;

/// The untyped half of a peer that call handles talk to.
pub(crate) trait RpcClient: Send + Sync {
    fn do_rpc(
        &self,
        request: AnyPayload,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<DecodedPayload, RpcError>>;

    fn do_msg(&self, message: AnyPayload) -> BoxFuture<'_, Result<(), RpcError>>;
}

/// A handle for calling one two-way operation on the remote peer.
///
/// Obtained from [`Peer::rpc`](crate::Peer::rpc). Cloning is cheap and
/// clones share the peer.
pub struct RpcDef<Req, Resp> {
    client: Arc<dyn RpcClient>,
    timeout: Duration,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> Clone for RpcDef<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            timeout: self.timeout,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp> fmt::Debug for RpcDef<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcDef")
            .field("request", &type_name::<Req>())
            .field("response", &type_name::<Resp>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<Req: Payload, Resp: Payload> RpcDef<Req, Resp> {
    pub(crate) fn new(client: Arc<dyn RpcClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            _marker: PhantomData,
        }
    }

    /// Sends `request` and waits for the matching response.
    ///
    /// # Errors
    /// - `RpcError::Timeout` if no response arrives in time.
    /// - `RpcError::Disconnected` / `RpcError::Closed` if the request
    ///   could not be sent; these return immediately.
    /// - `RpcError::Protocol` if either payload fails to encode or decode.
    pub async fn call(&self, request: Req) -> Result<Resp, RpcError> {
        let response = self.client.do_rpc(Box::new(request), self.timeout).await?;
        response.downcast::<Resp>().map_err(|_| RpcError::TypeMismatch {
            expected: type_name::<Resp>(),
        })
    }

    /// The same handle with a different deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How long [`call`](Self::call) waits for a response.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// A handle for sending one one-way message type to the remote peer.
///
/// Obtained from [`Peer::message`](crate::Peer::message).
pub struct MsgDef<M> {
    client: Arc<dyn RpcClient>,
    _marker: PhantomData<fn(M)>,
}

impl<M> Clone for MsgDef<M> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            _marker: PhantomData,
        }
    }
}

impl<M> fmt::Debug for MsgDef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgDef")
            .field("message", &type_name::<M>())
            .finish()
    }
}

impl<M: Payload> MsgDef<M> {
    pub(crate) fn new(client: Arc<dyn RpcClient>) -> Self {
        Self {
            client,
            _marker: PhantomData,
        }
    }

    /// Sends `msg` without waiting for anything.
    ///
    /// # Errors
    /// Only send-path failures: `Disconnected`, `Closed`, or `Protocol`.
    pub async fn send(&self, msg: M) -> Result<(), RpcError> {
        self.client.do_msg(Box::new(msg)).await
    }
}
