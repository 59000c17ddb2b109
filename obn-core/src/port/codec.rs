//! The typed, tag-value wire codec shared by every port.
//!
//! Per the design note on dynamic port typing, the deep
//! container-times-element-times-strictness-times-format dispatch of the
//! original bindings is replaced by a single trait, [`PortData`],
//! implemented once per concrete Rust type a port can carry. A port is
//! generic over its `PortData` type; the container shape ([`PortShape`])
//! is carried alongside purely as metadata for wire messages and
//! diagnostics, not as a runtime tag on the value itself.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{InputPortError, OutputPortError};
use crate::port::matrix::Matrix;

/// The container shape of a port's value, as declared at port creation.
/// Carried in connection metadata so the dependency graph and protocol
/// layer can describe a port without needing its Rust type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortShape {
    /// A single scalar element.
    Scalar,
    /// A dynamically-sized vector of elements.
    Vector,
    /// A dynamically-sized, column-major matrix of elements.
    Matrix,
    /// Raw, uninterpreted bytes.
    Bytes,
    /// An opaque, application-defined message type.
    UserMessage,
}

/// Any value that can flow through a port: encoded to bytes for the
/// transport, decoded back on the receiving end, and tagged with the
/// [`PortShape`] it represents.
///
/// Implemented for the scalar element types named by the data model
/// (`bool`, `i32`, `i64`, `u32`, `u64`, `f32`, `f64`), for `Vec<T>` and
/// [`Matrix<T>`] of those element types, for `Vec<u8>` (the raw-binary
/// shape), and, via the blanket [`UserMessage`] wrapper, for any
/// `Serialize + DeserializeOwned` application type.
pub trait PortData: Clone + Send + 'static {
    /// The container shape this type represents.
    const SHAPE: PortShape;

    /// Encodes the value using the tag-value wire codec (CBOR).
    fn encode(&self) -> Result<Vec<u8>, OutputPortError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self.as_serialize(), &mut buf)
            .map_err(|e| OutputPortError::EncodeValue(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a value previously produced by [`PortData::encode`].
    fn decode(bytes: &[u8]) -> Result<Self, InputPortError>
    where
        Self: Sized,
    {
        Self::from_deserialize(
            ciborium::from_reader(bytes).map_err(|e| InputPortError::RawMsg(e.to_string()))?,
        )
    }

    /// Intermediate serializable representation used by the default
    /// [`encode`](PortData::encode)/[`decode`](PortData::decode)
    /// implementations. Kept as an associated type indirection so scalar
    /// primitives can serialize themselves directly.
    type Wire: Serialize + DeserializeOwned;

    /// Borrows `self` as its wire representation.
    fn as_serialize(&self) -> &Self::Wire;

    /// Rebuilds a value from its decoded wire representation, validating
    /// shape invariants (e.g. non-empty matrices with consistent strides).
    fn from_deserialize(wire: Self::Wire) -> Result<Self, InputPortError>
    where
        Self: Sized;
}

/// An element type usable in `scalar<T>`, `vector<T>` and `matrix<T>`
/// ports.
pub trait Elem: Copy + Clone + Send + Serialize + DeserializeOwned + PartialEq + 'static {}

impl Elem for bool {}
impl Elem for i32 {}
impl Elem for i64 {}
impl Elem for u32 {}
impl Elem for u64 {}
impl Elem for f32 {}
impl Elem for f64 {}

macro_rules! impl_scalar_port_data {
    ($t:ty) => {
        impl PortData for $t {
            const SHAPE: PortShape = PortShape::Scalar;
            type Wire = $t;
            fn as_serialize(&self) -> &Self::Wire {
                self
            }
            fn from_deserialize(wire: Self::Wire) -> Result<Self, InputPortError> {
                Ok(wire)
            }
        }
    };
}

impl_scalar_port_data!(bool);
impl_scalar_port_data!(i32);
impl_scalar_port_data!(i64);
impl_scalar_port_data!(u32);
impl_scalar_port_data!(u64);
impl_scalar_port_data!(f32);
impl_scalar_port_data!(f64);

impl<T: Elem> PortData for Vec<T> {
    const SHAPE: PortShape = PortShape::Vector;
    type Wire = Vec<T>;
    fn as_serialize(&self) -> &Self::Wire {
        self
    }
    fn from_deserialize(wire: Self::Wire) -> Result<Self, InputPortError> {
        Ok(wire)
    }
}

impl<T: Elem> PortData for Matrix<T> {
    const SHAPE: PortShape = PortShape::Matrix;
    type Wire = Matrix<T>;
    fn as_serialize(&self) -> &Self::Wire {
        self
    }
    fn from_deserialize(wire: Self::Wire) -> Result<Self, InputPortError> {
        if wire.as_column_major().len() != wire.rows() * wire.cols() {
            return Err(InputPortError::ReadValue(
                "matrix element count does not match rows * cols".to_string(),
            ));
        }
        Ok(wire)
    }
}

/// Raw binary payload port shape: bytes are transported as-is, with no
/// CBOR envelope, so the content is whatever the two ends agree on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

impl PortData for Bytes {
    const SHAPE: PortShape = PortShape::Bytes;
    type Wire = Vec<u8>;

    fn encode(&self) -> Result<Vec<u8>, OutputPortError> {
        Ok(self.0.clone())
    }

    fn decode(bytes: &[u8]) -> Result<Self, InputPortError> {
        Ok(Self(bytes.to_vec()))
    }

    fn as_serialize(&self) -> &Self::Wire {
        &self.0
    }

    fn from_deserialize(wire: Self::Wire) -> Result<Self, InputPortError> {
        Ok(Self(wire))
    }
}

/// A user-defined, opaque message type, serialized with the same tag-value
/// (CBOR) codec as the built-in element types.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessage<T>(pub T);

impl<T> PortData for UserMessage<T>
where
    T: Clone + Send + Serialize + DeserializeOwned + 'static,
{
    const SHAPE: PortShape = PortShape::UserMessage;
    type Wire = T;
    fn as_serialize(&self) -> &Self::Wire {
        &self.0
    }
    fn from_deserialize(wire: Self::Wire) -> Result<Self, InputPortError> {
        Ok(Self(wire))
    }
}
