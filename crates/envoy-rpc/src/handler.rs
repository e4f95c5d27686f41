//! Type-erased handler table.
//!
//! Typed closures registered on a [`PeerBuilder`](crate::PeerBuilder) are
//! wrapped into boxed functions over [`AnyPayload`] and filed under the
//! `TypeId` of their request type. The receive loop decodes a payload,
//! looks up its type here, and calls whatever it finds.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use envoy_protocol::{AnyPayload, Payload};

use crate::{ConfigError, OperationKind, RpcError, ServiceDefinition};

type RpcFn = Box<dyn Fn(AnyPayload) -> Result<AnyPayload, RpcError> + Send + Sync>;
type MessageFn = Box<dyn Fn(AnyPayload) -> Result<(), RpcError> + Send + Sync>;

pub(crate) struct RpcHandler {
    pub(crate) request_name: &'static str,
    response_type: TypeId,
    response_name: &'static str,
    call: RpcFn,
    invocations: AtomicU64,
}

pub(crate) struct MessageHandler {
    pub(crate) request_name: &'static str,
    call: MessageFn,
    invocations: AtomicU64,
}

impl RpcHandler {
    fn new<Req, Resp, F>(f: F) -> Self
    where
        Req: Payload,
        Resp: Payload,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        let call = move |value: AnyPayload| -> Result<AnyPayload, RpcError> {
            let request = value.downcast::<Req>().map_err(|_| {
                RpcError::TypeMismatch {
                    expected: type_name::<Req>(),
                }
            })?;
            Ok(Box::new(f(*request)))
        };

        Self {
            request_name: type_name::<Req>(),
            response_type: TypeId::of::<Resp>(),
            response_name: type_name::<Resp>(),
            call: Box::new(call),
            invocations: AtomicU64::new(0),
        }
    }

    pub(crate) fn invoke(&self, request: AnyPayload) -> Result<AnyPayload, RpcError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        (self.call)(request)
    }
}

impl MessageHandler {
    fn new<M, F>(f: F) -> Self
    where
        M: Payload,
        F: Fn(M) + Send + Sync + 'static,
    {
        let call = move |value: AnyPayload| -> Result<(), RpcError> {
            let msg = value.downcast::<M>().map_err(|_| RpcError::TypeMismatch {
                expected: type_name::<M>(),
            })?;
            f(*msg);
            Ok(())
        };

        Self {
            request_name: type_name::<M>(),
            call: Box::new(call),
            invocations: AtomicU64::new(0),
        }
    }

    pub(crate) fn invoke(&self, msg: AnyPayload) -> Result<(), RpcError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        (self.call)(msg)
    }
}

pub(crate) enum Handler {
    Rpc(RpcHandler),
    Message(MessageHandler),
}

impl Handler {
    fn request_name(&self) -> &'static str {
        match self {
            Self::Rpc(h) => h.request_name,
            Self::Message(h) => h.request_name,
        }
    }

    fn invocations(&self) -> u64 {
        match self {
            Self::Rpc(h) => h.invocations.load(Ordering::Relaxed),
            Self::Message(h) => h.invocations.load(Ordering::Relaxed),
        }
    }
}

/// Handlers keyed by request type. At most one per type.
#[derive(Default)]
pub(crate) struct Handlers {
    table: HashMap<TypeId, Handler>,
}

impl Handlers {
    pub(crate) fn insert_rpc<Req, Resp, F>(&mut self, f: F) -> Result<(), ConfigError>
    where
        Req: Payload,
        Resp: Payload,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        self.insert(TypeId::of::<Req>(), Handler::Rpc(RpcHandler::new(f)))
    }

    pub(crate) fn insert_message<M, F>(&mut self, f: F) -> Result<(), ConfigError>
    where
        M: Payload,
        F: Fn(M) + Send + Sync + 'static,
    {
        self.insert(TypeId::of::<M>(), Handler::Message(MessageHandler::new(f)))
    }

    fn insert(&mut self, key: TypeId, handler: Handler) -> Result<(), ConfigError> {
        if self.table.contains_key(&key) {
            return Err(ConfigError::DuplicateHandler(handler.request_name()));
        }
        self.table.insert(key, handler);
        Ok(())
    }

    pub(crate) fn rpc(&self, request_type: TypeId) -> Option<&RpcHandler> {
        match self.table.get(&request_type) {
            Some(Handler::Rpc(h)) => Some(h),
            _ => None,
        }
    }

    pub(crate) fn message(&self, request_type: TypeId) -> Option<&MessageHandler> {
        match self.table.get(&request_type) {
            Some(Handler::Message(h)) => Some(h),
            _ => None,
        }
    }

    /// How many times the handler for `request_type` has run.
    pub(crate) fn invocations(&self, request_type: TypeId) -> u64 {
        self.table
            .get(&request_type)
            .map_or(0, Handler::invocations)
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }

    /// Checks that the table covers `service` exactly.
    ///
    /// Every declared operation needs a handler of the same kind, every
    /// handler needs a declared operation, and rpc handlers must produce
    /// the declared response type.
    pub(crate) fn validate<C>(&self, service: &ServiceDefinition<C>) -> Result<(), ConfigError>
    where
        C: envoy_protocol::Codec + Clone,
    {
        for op in service.operations() {
            match (op.kind, self.table.get(&op.request_type)) {
                (OperationKind::Rpc, Some(Handler::Rpc(h))) => {
                    if Some(h.response_type) != op.response_type {
                        return Err(ConfigError::ResponseMismatch {
                            request: op.request_name,
                            declared: op.response_name.unwrap_or("()"),
                            requested: h.response_name,
                        });
                    }
                }
                (OperationKind::Message, Some(Handler::Message(_))) => {}
                (_, None) => return Err(ConfigError::MissingHandler(op.request_name)),
                (_, Some(h)) => {
                    return Err(ConfigError::UndeclaredOperation(h.request_name()));
                }
            }
        }

        for (request_type, handler) in &self.table {
            if service.operation(*request_type).is_none() {
                return Err(ConfigError::UndeclaredOperation(handler.request_name()));
            }
        }
        Ok(())
    }
}
