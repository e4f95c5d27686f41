//! Service contracts: which requests a peer accepts and what it answers.
//!
//! A contract is declared once, at startup, by listing operations on a
//! [`ServiceBuilder`]:
//!
//! - `rpc::<Req, Resp>()`: two-way: `Req` goes into the request union,
//!   `Resp` into the response union.
//! - `message::<M>()`: one-way: `M` goes into the request union only.
//!
//! Tags are assigned in declaration order, so both ends must declare the
//! same operations in the same order. Adding, removing, or reordering
//! operations is a wire-incompatible change.
//!
//! ```rust
//! use envoy_protocol::JsonCodec;
//! use envoy_rpc::ServiceDefinition;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Add { x: i64, y: i64 }
//!
//! #[derive(Serialize, Deserialize)]
//! struct Ping;
//!
//! let def = ServiceDefinition::builder(JsonCodec)
//!     .rpc::<Add, i64>()
//!     .message::<Ping>()
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(def.requests().tag_of::<Add>(), Some(0));
//! assert_eq!(def.requests().tag_of::<Ping>(), Some(1));
//! assert_eq!(def.responses().tag_of::<i64>(), Some(0));
//! ```

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use envoy_protocol::{Codec, Payload, UnionBuilder, UnionCodec};

use crate::{ConfigError, PeerBuilder};

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Whether an operation expects an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Two-way: one request, one response.
    Rpc,
    /// One-way: fire and forget.
    Message,
}

/// One declared operation of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    /// Two-way or one-way.
    pub kind: OperationKind,
    /// `TypeId` of the request (or message) payload.
    pub request_type: TypeId,
    /// Type name of the request payload.
    pub request_name: &'static str,
    /// `TypeId` of the response payload; `None` for messages.
    pub response_type: Option<TypeId>,
    /// Type name of the response payload; `None` for messages.
    pub response_name: Option<&'static str>,
}

impl Operation {
    fn rpc<Req: Payload, Resp: Payload>() -> Self {
        Self {
            kind: OperationKind::Rpc,
            request_type: TypeId::of::<Req>(),
            request_name: type_name::<Req>(),
            response_type: Some(TypeId::of::<Resp>()),
            response_name: Some(type_name::<Resp>()),
        }
    }

    fn message<M: Payload>() -> Self {
        Self {
            kind: OperationKind::Message,
            request_type: TypeId::of::<M>(),
            request_name: type_name::<M>(),
            response_type: None,
            response_name: None,
        }
    }
}

/// A type that lists the operations of a service.
///
/// This is how a contract is written down once and shared by both ends:
///
/// ```rust
/// use envoy_protocol::Codec;
/// use envoy_rpc::{ServiceBuilder, ServiceShape};
///
/// struct Calculator;
///
/// impl ServiceShape for Calculator {
///     fn declare<C: Codec + Clone>(service: ServiceBuilder<C>) -> ServiceBuilder<C> {
///         service.rpc::<(i64, i64), i64>()
///     }
/// }
/// ```
pub trait ServiceShape {
    /// Adds this service's operations to `service`, in order.
    fn declare<C: Codec + Clone>(service: ServiceBuilder<C>) -> ServiceBuilder<C>;
}

/// A service with no operations. Useful for the side of an interface
/// that only calls.
pub struct NoService;

impl ServiceShape for NoService {
    fn declare<C: Codec + Clone>(service: ServiceBuilder<C>) -> ServiceBuilder<C> {
        service
    }
}

// ---------------------------------------------------------------------------
// ServiceBuilder
// ---------------------------------------------------------------------------

/// Accumulates operations for a [`ServiceDefinition`].
///
/// Errors are remembered and reported by [`build`](Self::build), so the
/// declaration can stay one chain.
pub struct ServiceBuilder<C> {
    requests: UnionBuilder<C>,
    responses: UnionBuilder<C>,
    operations: Vec<Operation>,
    error: Option<ConfigError>,
}

impl<C: Codec + Clone> ServiceBuilder<C> {
    /// Starts an empty contract whose payloads are encoded with `codec`.
    pub fn new(codec: C) -> Self {
        Self {
            requests: UnionBuilder::new(codec.clone()),
            responses: UnionBuilder::new(codec),
            operations: Vec::new(),
            error: None,
        }
    }

    /// Declares a two-way operation.
    pub fn rpc<Req: Payload, Resp: Payload>(mut self) -> Self {
        if self.push(Operation::rpc::<Req, Resp>()) {
            self.requests.add::<Req>();
            self.responses.add::<Resp>();
        }
        self
    }

    /// Declares a one-way operation.
    pub fn message<M: Payload>(mut self) -> Self {
        if self.push(Operation::message::<M>()) {
            self.requests.add::<M>();
        }
        self
    }

    /// Finishes the contract.
    ///
    /// # Errors
    /// `ConfigError::DuplicateRequest` if a request or message type was
    /// declared twice.
    pub fn build(self) -> Result<ServiceDefinition<C>, ConfigError> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let by_request = self
            .operations
            .iter()
            .enumerate()
            .map(|(i, op)| (op.request_type, i))
            .collect();

        Ok(ServiceDefinition {
            inner: Arc::new(Contract {
                requests: self.requests.build(),
                responses: self.responses.build(),
                operations: self.operations,
                by_request,
            }),
        })
    }

    /// Records `op`, returning `false` if its request type is taken.
    fn push(&mut self, op: Operation) -> bool {
        let taken = self
            .operations
            .iter()
            .any(|existing| existing.request_type == op.request_type);
        if taken {
            self.error
                .get_or_insert(ConfigError::DuplicateRequest(op.request_name));
            return false;
        }
        self.operations.push(op);
        true
    }
}

// ---------------------------------------------------------------------------
// ServiceDefinition
// ---------------------------------------------------------------------------

struct Contract<C> {
    requests: UnionCodec<C>,
    responses: UnionCodec<C>,
    operations: Vec<Operation>,
    by_request: HashMap<TypeId, usize>,
}

/// A finished contract: the request and response unions plus the
/// operation list. Cheap to clone.
pub struct ServiceDefinition<C> {
    inner: Arc<Contract<C>>,
}

impl<C> Clone for ServiceDefinition<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> std::fmt::Debug for ServiceDefinition<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("requests", &self.inner.requests)
            .field("responses", &self.inner.responses)
            .finish()
    }
}

impl<C: Codec + Clone> ServiceDefinition<C> {
    /// Starts declaring a contract.
    pub fn builder(codec: C) -> ServiceBuilder<C> {
        ServiceBuilder::new(codec)
    }

    /// Builds the contract declared by `S`.
    pub fn of<S: ServiceShape>(codec: C) -> Result<Self, ConfigError> {
        S::declare(ServiceBuilder::new(codec)).build()
    }

    /// A contract with no operations.
    pub fn empty(codec: C) -> Self {
        Self {
            inner: Arc::new(Contract {
                requests: UnionBuilder::new(codec.clone()).build(),
                responses: UnionBuilder::new(codec).build(),
                operations: Vec::new(),
                by_request: HashMap::new(),
            }),
        }
    }

    /// Union over every request and message payload type.
    pub fn requests(&self) -> &UnionCodec<C> {
        &self.inner.requests
    }

    /// Union over every response payload type.
    pub fn responses(&self) -> &UnionCodec<C> {
        &self.inner.responses
    }

    /// Every declared operation, in declaration order.
    pub fn operations(&self) -> &[Operation] {
        &self.inner.operations
    }

    /// The operation whose request payload has this `TypeId`.
    pub fn operation(&self, request_type: TypeId) -> Option<&Operation> {
        self.inner
            .by_request
            .get(&request_type)
            .map(|&i| &self.inner.operations[i])
    }

    /// The operation whose request payload is `T`.
    pub fn operation_of<T: 'static>(&self) -> Option<&Operation> {
        self.operation(TypeId::of::<T>())
    }
}

// ---------------------------------------------------------------------------
// InterfaceDef
// ---------------------------------------------------------------------------

/// Both halves of a two-way interface.
///
/// `service` is what the listening side serves; `client` is what the
/// dialing side serves back (callbacks, pushes). [`server`](Self::server)
/// and [`client`](Self::client) hand out peer builders with the roles
/// already assigned, so both ends derive their unions from one value.
pub struct InterfaceDef<C> {
    service: ServiceDefinition<C>,
    client: ServiceDefinition<C>,
}

impl<C> Clone for InterfaceDef<C> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            client: self.client.clone(),
        }
    }
}

impl<C: Codec + Clone> InterfaceDef<C> {
    /// Pairs two finished contracts.
    pub fn new(service: ServiceDefinition<C>, client: ServiceDefinition<C>) -> Self {
        Self { service, client }
    }

    /// Builds both contracts from their shapes.
    pub fn of<S: ServiceShape, K: ServiceShape>(codec: C) -> Result<Self, ConfigError> {
        Ok(Self {
            service: ServiceDefinition::of::<S>(codec.clone())?,
            client: ServiceDefinition::of::<K>(codec)?,
        })
    }

    /// The contract served by the listening side.
    pub fn service(&self) -> &ServiceDefinition<C> {
        &self.service
    }

    /// The contract served by the dialing side.
    pub fn client_service(&self) -> &ServiceDefinition<C> {
        &self.client
    }

    /// A peer that serves `service` and calls `client`.
    pub fn server(&self) -> PeerBuilder<C> {
        PeerBuilder::new(self.service.clone(), self.client.clone())
    }

    /// A peer that serves `client` and calls `service`.
    pub fn client(&self) -> PeerBuilder<C> {
        PeerBuilder::new(self.client.clone(), self.service.clone())
    }
}
