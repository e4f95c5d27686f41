//! Tagged unions over a closed set of payload types.
//!
//! A service contract declares which request and response types it knows.
//! A [`UnionCodec`] turns that list into a wire format: every value is
//! written as `{ tag, data }`, where `tag` is the type's position in the
//! declaration order and `data` is the value itself, serialized in place
//! by the underlying [`Codec`].
//!
//! Two processes that build their unions from the same declarations agree
//! on every tag without exchanging any schema.
//!
//! ```text
//! declare: [AddRequest, PingMessage]
//!            tag 0       tag 1
//!
//! encode(AddRequest { x: 2, y: 3 })
//!   → { "tag": 0, "data": { "x": 2, "y": 3 } }
//! ```
//!
//! Decoding reads the frame twice: once for the tag, then once more as the
//! member type the tag names.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Codec, ProtocolError};

/// Anything that can travel as a request, response, or message payload.
///
/// Blanket-implemented; you never implement this by hand. Deriving
/// `Serialize` and `Deserialize` on a `'static` type is enough.
pub trait Payload: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + 'static {}

/// A decoded payload whose concrete type is only known at runtime.
pub type AnyPayload = Box<dyn Any + Send>;

type EncodeFn<C> =
    fn(&C, u32, &(dyn Any + Send)) -> Result<Vec<u8>, ProtocolError>;
type DecodeFn<C> = fn(&C, &[u8]) -> Result<AnyPayload, ProtocolError>;

/// One member of the union: its identity plus monomorphized encode and
/// decode functions for the concrete type.
struct Variant<C> {
    type_id: TypeId,
    name: &'static str,
    encode: EncodeFn<C>,
    decode: DecodeFn<C>,
}

/// The frame a union value is written as.
#[derive(Serialize)]
struct TaggedRef<'a, T> {
    tag: u32,
    data: &'a T,
}

/// Just the tag of a frame; `data` is skipped.
#[derive(Deserialize)]
struct TagOnly {
    tag: u32,
}

/// Just the value of a frame, once its type is known.
#[derive(Deserialize)]
struct DataOnly<T> {
    data: T,
}

fn encode_variant<C: Codec, T: Payload>(
    codec: &C,
    tag: u32,
    value: &(dyn Any + Send),
) -> Result<Vec<u8>, ProtocolError> {
    let value = value
        .downcast_ref::<T>()
        .ok_or(ProtocolError::TypeMismatch {
            expected: type_name::<T>(),
        })?;
    codec.encode(&TaggedRef { tag, data: value })
}

fn decode_variant<C: Codec, T: Payload>(
    codec: &C,
    frame: &[u8],
) -> Result<AnyPayload, ProtocolError> {
    let frame: DataOnly<T> = codec.decode(frame)?;
    Ok(Box::new(frame.data))
}

// ---------------------------------------------------------------------------
// UnionBuilder
// ---------------------------------------------------------------------------

/// Collects the member types of a union in declaration order.
///
/// ```rust
/// use envoy_protocol::{JsonCodec, UnionBuilder};
///
/// let union = UnionBuilder::new(JsonCodec)
///     .with::<String>()
///     .with::<u64>()
///     .build();
///
/// assert_eq!(union.tag_of::<String>(), Some(0));
/// assert_eq!(union.tag_of::<u64>(), Some(1));
/// ```
pub struct UnionBuilder<C> {
    codec: C,
    variants: Vec<Variant<C>>,
    index: HashMap<TypeId, u32>,
}

impl<C: Codec> UnionBuilder<C> {
    /// Starts an empty union that encodes member values with `codec`.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            variants: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Adds `T` as the next member. Chainable form of [`add`](Self::add).
    pub fn with<T: Payload>(mut self) -> Self {
        self.add::<T>();
        self
    }

    /// Adds `T` as the next member and returns its tag.
    ///
    /// Adding a type that is already a member changes nothing and returns
    /// the tag it got the first time.
    pub fn add<T: Payload>(&mut self) -> u32 {
        let type_id = TypeId::of::<T>();
        if let Some(&tag) = self.index.get(&type_id) {
            return tag;
        }

        let tag = self.variants.len() as u32;
        self.variants.push(Variant {
            type_id,
            name: type_name::<T>(),
            encode: encode_variant::<C, T>,
            decode: decode_variant::<C, T>,
        });
        self.index.insert(type_id, tag);
        tag
    }

    /// Freezes the member list.
    pub fn build(self) -> UnionCodec<C> {
        UnionCodec {
            inner: Arc::new(UnionInner {
                codec: self.codec,
                variants: self.variants,
                index: self.index,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// UnionCodec
// ---------------------------------------------------------------------------

struct UnionInner<C> {
    codec: C,
    variants: Vec<Variant<C>>,
    index: HashMap<TypeId, u32>,
}

/// Encoder/decoder for a closed set of payload types.
///
/// Cheap to clone: the member table is shared behind an `Arc`.
pub struct UnionCodec<C> {
    inner: Arc<UnionInner<C>>,
}

impl<C> Clone for UnionCodec<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for UnionCodec<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.inner.variants.iter().map(|v| v.name))
            .finish()
    }
}

/// A value pulled out of a union frame.
pub struct DecodedPayload {
    /// The tag the frame carried.
    pub tag: u32,
    /// `TypeId` of the concrete type behind `value`.
    pub type_id: TypeId,
    /// Type name of the concrete type, for logs and errors.
    pub type_name: &'static str,
    /// The decoded value.
    pub value: AnyPayload,
}

impl DecodedPayload {
    /// Recovers the concrete value.
    ///
    /// # Errors
    /// `ProtocolError::TypeMismatch` if the payload is not a `T`.
    pub fn downcast<T: Payload>(self) -> Result<T, ProtocolError> {
        self.value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| ProtocolError::TypeMismatch {
                expected: type_name::<T>(),
            })
    }
}

impl fmt::Debug for DecodedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedPayload")
            .field("tag", &self.tag)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl<C: Codec> UnionCodec<C> {
    /// Number of member types.
    pub fn len(&self) -> usize {
        self.inner.variants.len()
    }

    /// Whether the union has no members at all.
    pub fn is_empty(&self) -> bool {
        self.inner.variants.is_empty()
    }

    /// The tag assigned to `T`, if it is a member.
    pub fn tag_of<T: 'static>(&self) -> Option<u32> {
        self.tag_of_id(TypeId::of::<T>())
    }

    /// The tag assigned to the type with this `TypeId`, if it is a member.
    pub fn tag_of_id(&self, type_id: TypeId) -> Option<u32> {
        self.inner.index.get(&type_id).copied()
    }

    /// Whether `T` is a member.
    pub fn contains<T: 'static>(&self) -> bool {
        self.tag_of::<T>().is_some()
    }

    /// Member type names in tag order.
    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.inner.variants.iter().map(|v| v.name)
    }

    /// Encodes a value of a member type.
    ///
    /// # Errors
    /// `ProtocolError::UnregisteredType` if `T` is not a member.
    pub fn encode<T: Payload>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        let tag = self
            .tag_of::<T>()
            .ok_or(ProtocolError::UnregisteredType(type_name::<T>()))?;
        self.inner.codec.encode(&TaggedRef { tag, data: value })
    }

    /// Encodes a type-erased value by looking up its runtime type.
    ///
    /// # Errors
    /// `ProtocolError::UnregisteredType` if the value's type is not a
    /// member.
    pub fn encode_any(
        &self,
        value: &(dyn Any + Send),
    ) -> Result<Vec<u8>, ProtocolError> {
        let tag = self
            .tag_of_id((*value).type_id())
            .ok_or(ProtocolError::UnregisteredType("<type-erased value>"))?;
        let variant = &self.inner.variants[tag as usize];
        (variant.encode)(&self.inner.codec, tag, value)
    }

    /// Decodes a union frame into whichever member type its tag names.
    ///
    /// # Errors
    /// - `ProtocolError::Decode` for malformed frames or payloads.
    /// - `ProtocolError::UnknownTag` if the tag has no member.
    pub fn decode(&self, data: &[u8]) -> Result<DecodedPayload, ProtocolError> {
        let TagOnly { tag } = self.inner.codec.decode(data)?;
        let variant = self
            .inner
            .variants
            .get(tag as usize)
            .ok_or(ProtocolError::UnknownTag(tag))?;

        let value = (variant.decode)(&self.inner.codec, data)?;
        Ok(DecodedPayload {
            tag,
            type_id: variant.type_id,
            type_name: variant.name,
            value,
        })
    }

    /// Decodes a frame that is expected to hold a `T`.
    ///
    /// # Errors
    /// Everything [`decode`](Self::decode) returns, plus
    /// `ProtocolError::TypeMismatch` if the frame holds another member.
    pub fn decode_as<T: Payload>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        self.decode(data)?.downcast::<T>()
    }
}
