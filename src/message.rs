//! Message payloads and their self-describing header.
//!
//! A payload is either a single array or an ordered tuple of arrays. Before any
//! payload bytes move, the sender ships a `MessageDescriptor` so the receiver can
//! allocate exactly-sized buffers; the bulk channel then carries raw `f32` data with
//! no framing of its own.

use serde::{Deserialize, Serialize};

use crate::array::StageArray;
use crate::error::{Error, Result};

/// A validated message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<A> {
    Single(A),
    Tuple(Vec<A>),
}

impl<A> Payload<A> {
    pub fn is_tuple(&self) -> bool {
        matches!(self, Payload::Tuple(_))
    }

    /// Number of arrays carried, i.e. the number of bulk transfers.
    pub fn len(&self) -> usize {
        match self {
            Payload::Single(_) => 1,
            Payload::Tuple(arrays) => arrays.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arrays in transfer order; a single array is a one-element slice.
    pub fn arrays(&self) -> &[A] {
        match self {
            Payload::Single(array) => std::slice::from_ref(array),
            Payload::Tuple(arrays) => arrays,
        }
    }

    /// Consume into the ordered array list.
    pub fn into_arrays(self) -> Vec<A> {
        match self {
            Payload::Single(array) => vec![array],
            Payload::Tuple(arrays) => arrays,
        }
    }

    /// The array of a `Single` payload.
    pub fn into_single(self) -> Result<A> {
        match self {
            Payload::Single(array) => Ok(array),
            Payload::Tuple(arrays) => Err(Error::contract(format!(
                "expected a single array, received a tuple of {}",
                arrays.len()
            ))),
        }
    }

    /// The arrays of a `Tuple` payload.
    pub fn into_tuple(self) -> Result<Vec<A>> {
        match self {
            Payload::Tuple(arrays) => Ok(arrays),
            Payload::Single(_) => Err(Error::contract(
                "expected a tuple, received a single array",
            )),
        }
    }
}

impl<A> From<A> for Payload<A> {
    fn from(array: A) -> Self {
        Payload::Single(array)
    }
}

/// Loosely typed input for callers that build messages dynamically.
///
/// Only `Array` and a flat `Sequence` of arrays are transferable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<A> {
    Array(A),
    Sequence(Vec<Value<A>>),
    Scalar(f64),
}

impl<A> Value<A> {
    fn kind(&self) -> &'static str {
        match self {
            Value::Array(_) => "array",
            Value::Sequence(_) => "sequence",
            Value::Scalar(_) => "scalar",
        }
    }
}

impl<A> TryFrom<Value<A>> for Payload<A> {
    type Error = Error;

    fn try_from(value: Value<A>) -> Result<Self> {
        match value {
            Value::Array(array) => Ok(Payload::Single(array)),
            Value::Sequence(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Array(array) => Ok(array),
                    other => Err(Error::InvalidPayloadKind {
                        reason: format!("tuple element {i} is a {}, not an array", other.kind()),
                    }),
                })
                .collect::<Result<Vec<_>>>()
                .map(Payload::Tuple),
            Value::Scalar(_) => Err(Error::InvalidPayloadKind {
                reason: "message object should be an array or a sequence of arrays, got a scalar"
                    .to_string(),
            }),
        }
    }
}

/// Shape header exchanged ahead of the bulk transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    pub is_tuple: bool,
    pub array_count: usize,
    pub dims: Vec<usize>,
    pub shapes: Vec<Vec<usize>>,
}

impl MessageDescriptor {
    /// Describe `payload` without touching its data.
    pub fn from_payload<A: StageArray>(payload: &Payload<A>) -> Self {
        let arrays = payload.arrays();
        Self {
            is_tuple: payload.is_tuple(),
            array_count: arrays.len(),
            dims: arrays.iter().map(|a| a.ndim()).collect(),
            shapes: arrays.iter().map(|a| a.shape().to_vec()).collect(),
        }
    }

    /// Check internal consistency of a header received from a peer.
    pub fn validate(&self) -> Result<()> {
        if self.dims.len() != self.array_count || self.shapes.len() != self.array_count {
            return Err(Error::contract(format!(
                "descriptor declares {} arrays but carries {} dims and {} shapes",
                self.array_count,
                self.dims.len(),
                self.shapes.len()
            )));
        }
        if let Some(i) = (0..self.array_count).find(|&i| self.shapes[i].len() != self.dims[i]) {
            return Err(Error::contract(format!(
                "array {i} declares {} dims but shape {:?}",
                self.dims[i], self.shapes[i]
            )));
        }
        if !self.is_tuple && self.array_count != 1 {
            return Err(Error::contract(format!(
                "single-array message declares {} arrays",
                self.array_count
            )));
        }
        Ok(())
    }

    /// Element count of each declared array.
    ///
    /// Fails if an array's byte size could not be allocated on this platform.
    pub fn element_counts(&self) -> Result<Vec<usize>> {
        self.shapes
            .iter()
            .map(|shape| {
                shape
                    .iter()
                    .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                    .filter(|&n| {
                        n.checked_mul(std::mem::size_of::<f32>())
                            .is_some_and(|bytes| bytes <= isize::MAX as usize)
                    })
                    .ok_or_else(|| {
                        Error::contract(format!("shape {shape:?} is too large to receive"))
                    })
            })
            .collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let descriptor: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::contract(format!("malformed message descriptor: {e}")))?;
        descriptor.validate()?;
        Ok(descriptor)
    }
}
