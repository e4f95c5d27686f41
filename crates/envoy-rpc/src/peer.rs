//! The peer: one per connection, serving one contract and calling another.
//!
//! ```text
//!  caller tasks                         receive task
//!  ────────────                         ────────────
//!  RpcDef::call ─┐                      loop {
//!                │ register id            socket.recv()
//!                │ send Request ───►      Request  → handler → send Response
//!                │                        Response → calls[id].send(data)
//!                │ await oneshot ◄───     Message  → handler
//!                ▼                      }
//!  Ok(resp) / Timeout
//! ```
//!
//! Handlers run inline on the receive task, one envelope at a time, in
//! arrival order. A slow handler delays every envelope behind it.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use envoy_protocol::{AnyPayload, Codec, DecodedPayload, Envelope, Payload};
use envoy_transport::{Socket, TransportError};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::descriptor::RpcClient;
use crate::handler::Handlers;
use crate::{
    ConfigError, MsgDef, OperationKind, PeerConfig, RpcDef, RpcError, ServiceDefinition,
};

// ---------------------------------------------------------------------------
// PeerBuilder
// ---------------------------------------------------------------------------

/// Collects handlers and settings, then binds them to a socket.
///
/// Usually obtained from [`InterfaceDef::server`](crate::InterfaceDef::server)
/// or [`InterfaceDef::client`](crate::InterfaceDef::client).
///
/// # Example
///
/// ```rust,ignore
/// let peer = iface
///     .server()
///     .on_rpc(|add: Add| add.x + add.y)
///     .on_message(|_: Ping| tracing::info!("pinged"))
///     .connect(socket)?;
///
/// let notify = peer.message::<Notice>()?;
/// ```
pub struct PeerBuilder<C> {
    service: ServiceDefinition<C>,
    client: ServiceDefinition<C>,
    handlers: Handlers,
    config: PeerConfig,
    error: Option<ConfigError>,
}

impl<C: Codec + Clone> PeerBuilder<C> {
    /// A builder serving `service` and calling `client`.
    pub fn new(service: ServiceDefinition<C>, client: ServiceDefinition<C>) -> Self {
        Self {
            service,
            client,
            handlers: Handlers::default(),
            config: PeerConfig::default(),
            error: None,
        }
    }

    /// Replaces the peer configuration.
    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the handler for requests of type `Req`.
    pub fn on_rpc<Req, Resp, F>(mut self, handler: F) -> Self
    where
        Req: Payload,
        Resp: Payload,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        if let Err(e) = self.handlers.insert_rpc(handler) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Registers the handler for messages of type `M`.
    pub fn on_message<M, F>(mut self, handler: F) -> Self
    where
        M: Payload,
        F: Fn(M) + Send + Sync + 'static,
    {
        if let Err(e) = self.handlers.insert_message(handler) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// The contract this peer will serve.
    pub fn service(&self) -> &ServiceDefinition<C> {
        &self.service
    }

    /// The contract this peer will call.
    pub fn client(&self) -> &ServiceDefinition<C> {
        &self.client
    }

    /// Binds the peer to `socket` and starts its receive task.
    ///
    /// Returns immediately; must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Any handler registration error, or a mismatch between the
    /// registered handlers and the served contract.
    pub fn connect<S>(self, socket: S) -> Result<Peer<S, C>, ConfigError>
    where
        S: Socket<Message = Envelope>,
    {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.handlers.validate(&self.service)?;

        let config = self.config.validated();
        debug!(
            handlers = self.handlers.len(),
            serves = self.service.operations().len(),
            calls = self.client.operations().len(),
            "peer connecting"
        );

        let inner = Arc::new(PeerInner {
            socket,
            service: self.service,
            client: self.client,
            handlers: self.handlers,
            calls: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            config,
        });

        let recv_task = tokio::spawn(run(Arc::clone(&inner)));
        Ok(Peer { inner, recv_task })
    }
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

struct PeerInner<S, C> {
    socket: S,
    service: ServiceDefinition<C>,
    client: ServiceDefinition<C>,
    handlers: Handlers,
    /// Pending calls by correlation id.
    calls: Mutex<HashMap<u32, oneshot::Sender<Vec<u8>>>>,
    next_id: AtomicU32,
    config: PeerConfig,
}

/// A connected peer.
///
/// Dropping the peer stops its receive task; calls still waiting then
/// fail with `Closed` or run into their timeout.
pub struct Peer<S, C> {
    inner: Arc<PeerInner<S, C>>,
    recv_task: JoinHandle<()>,
}

impl<S, C> Peer<S, C>
where
    S: Socket<Message = Envelope>,
    C: Codec + Clone,
{
    /// A handle for calling the remote's `Req -> Resp` operation.
    ///
    /// # Errors
    /// `UndeclaredOperation` if the called contract has no rpc for `Req`,
    /// `ResponseMismatch` if it answers with something other than `Resp`.
    pub fn rpc<Req: Payload, Resp: Payload>(&self) -> Result<RpcDef<Req, Resp>, ConfigError> {
        let op = self
            .inner
            .client
            .operation_of::<Req>()
            .filter(|op| op.kind == OperationKind::Rpc)
            .ok_or(ConfigError::UndeclaredOperation(std::any::type_name::<Req>()))?;

        if op.response_type != Some(TypeId::of::<Resp>()) {
            return Err(ConfigError::ResponseMismatch {
                request: op.request_name,
                declared: op.response_name.unwrap_or("()"),
                requested: std::any::type_name::<Resp>(),
            });
        }

        Ok(RpcDef::new(self.client_handle(), self.inner.config.call_timeout))
    }

    /// A handle for sending `M` messages to the remote.
    ///
    /// # Errors
    /// `UndeclaredOperation` if the called contract has no message `M`.
    pub fn message<M: Payload>(&self) -> Result<MsgDef<M>, ConfigError> {
        self.inner
            .client
            .operation_of::<M>()
            .filter(|op| op.kind == OperationKind::Message)
            .ok_or(ConfigError::UndeclaredOperation(std::any::type_name::<M>()))?;

        Ok(MsgDef::new(self.client_handle()))
    }

    /// Closes the socket and fails every pending call with `Closed`.
    pub async fn close(&self) -> Result<(), RpcError> {
        let result = self.inner.socket.close().await;
        self.inner.fail_pending();
        info!("peer closed");
        result.map_err(RpcError::from)
    }

    /// Whether the underlying socket is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.socket.is_closed()
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.calls.lock().len()
    }

    /// How many requests or messages of type `T` this peer has handled.
    pub fn invocations<T: 'static>(&self) -> u64 {
        self.inner.handlers.invocations(TypeId::of::<T>())
    }

    /// The underlying socket.
    pub fn socket(&self) -> &S {
        &self.inner.socket
    }

    /// The effective (validated) configuration.
    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    /// The contract this peer serves.
    pub fn service(&self) -> &ServiceDefinition<C> {
        &self.inner.service
    }

    /// The contract this peer calls.
    pub fn client(&self) -> &ServiceDefinition<C> {
        &self.inner.client
    }

    fn client_handle(&self) -> Arc<dyn RpcClient> {
        self.inner.clone()
    }
}

impl<S, C> Drop for Peer<S, C> {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Outbound path
// ---------------------------------------------------------------------------

impl<S, C> PeerInner<S, C>
where
    S: Socket<Message = Envelope>,
    C: Codec + Clone,
{
    /// Allocates an id and parks a response slot under it.
    ///
    /// Ids count up per peer and skip any id that is still pending, so a
    /// wrapped counter can never hand out a live id twice.
    fn register_call(&self) -> (u32, oneshot::Receiver<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        let mut calls = self.calls.lock();
        let mut id = self.next_id.fetch_add(1, Ordering::Relaxed);
        while calls.contains_key(&id) {
            id = self.next_id.fetch_add(1, Ordering::Relaxed);
        }
        calls.insert(id, tx);
        (id, rx)
    }

    fn fail_pending(&self) {
        let abandoned: Vec<_> = self.calls.lock().drain().collect();
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "failing pending calls");
        }
        // Dropping the senders wakes every waiter with `Closed`.
        drop(abandoned);
    }

    async fn call_any(
        &self,
        request: AnyPayload,
        timeout: Duration,
    ) -> Result<DecodedPayload, RpcError> {
        let data = self.client.requests().encode_any(request.as_ref())?;
        let (id, rx) = self.register_call();

        if let Err(e) = self.socket.send(Envelope::Request { id, data }).await {
            self.calls.lock().remove(&id);
            debug!(id, error = %e, "request send failed");
            return Err(e.into());
        }
        trace!(id, "request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(data)) => Ok(self.client.responses().decode(&data)?),
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => {
                self.calls.lock().remove(&id);
                debug!(id, ?timeout, "call timed out");
                Err(RpcError::Timeout { id, after: timeout })
            }
        }
    }

    async fn send_any(&self, message: AnyPayload) -> Result<(), RpcError> {
        let data = self.client.requests().encode_any(message.as_ref())?;
        self.socket.send(Envelope::Message { data }).await?;
        Ok(())
    }
}

impl<S, C> RpcClient for PeerInner<S, C>
where
    S: Socket<Message = Envelope>,
    C: Codec + Clone,
{
    fn do_rpc(
        &self,
        request: AnyPayload,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<DecodedPayload, RpcError>> {
        Box::pin(self.call_any(request, timeout))
    }

    fn do_msg(&self, message: AnyPayload) -> BoxFuture<'_, Result<(), RpcError>> {
        Box::pin(self.send_any(message))
    }
}

// ---------------------------------------------------------------------------
// Inbound path
// ---------------------------------------------------------------------------

/// The receive task. Runs until the socket reports `Closed`.
async fn run<S, C>(inner: Arc<PeerInner<S, C>>)
where
    S: Socket<Message = Envelope>,
    C: Codec + Clone,
{
    loop {
        if inner.socket.is_closed() {
            break;
        }

        match inner.socket.recv().await {
            Ok(Some(envelope)) => inner.dispatch(envelope).await,
            Ok(None) => {}
            Err(TransportError::Closed) => break,
            Err(e) => {
                if matches!(e, TransportError::Disconnected) {
                    trace!("socket disconnected, waiting for redial");
                } else {
                    warn!(error = %e, "receive failed");
                }
                tokio::time::sleep(inner.config.recv_retry_backoff).await;
            }
        }
    }

    inner.fail_pending();
    debug!("receive loop stopped");
}

impl<S, C> PeerInner<S, C>
where
    S: Socket<Message = Envelope>,
    C: Codec + Clone,
{
    async fn dispatch(&self, envelope: Envelope) {
        trace!(kind = envelope.kind(), id = ?envelope.id(), "envelope received");

        match envelope {
            Envelope::Request { id, data } => match self.handle_request(&data) {
                Ok(data) => {
                    if let Err(e) = self.socket.send(Envelope::Response { id, data }).await {
                        warn!(id, error = %e, "failed to send response");
                    }
                }
                Err(e) => warn!(id, error = %e, "dropping request"),
            },
            Envelope::Response { id, data } => {
                let waiter = self.calls.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        if tx.send(data).is_err() {
                            debug!(id, "caller stopped waiting before the response arrived");
                        }
                    }
                    None => {
                        let error = RpcError::UnknownCall(id);
                        warn!(%error, "dropping response");
                    }
                }
            }
            Envelope::Message { data } => {
                if let Err(e) = self.handle_message(&data) {
                    warn!(error = %e, "dropping message");
                }
            }
        }
    }

    fn handle_request(&self, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let request = self.service.requests().decode(data)?;
        let handler = self
            .handlers
            .rpc(request.type_id)
            .ok_or(RpcError::NoHandler(request.type_name))?;

        trace!(request = handler.request_name, "handling request");
        let response = handler.invoke(request.value)?;
        Ok(self.service.responses().encode_any(response.as_ref())?)
    }

    fn handle_message(&self, data: &[u8]) -> Result<(), RpcError> {
        let msg = self.service.requests().decode(data)?;
        let handler = self
            .handlers
            .message(msg.type_id)
            .ok_or(RpcError::NoHandler(msg.type_name))?;

        trace!(message = handler.request_name, "handling message");
        handler.invoke(msg.value)
    }
}
