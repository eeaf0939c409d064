//! Array staging boundary.
//!
//! The transfer protocol only needs three things from an array: its shape, a
//! contiguous byte view of its `f32` elements, and a way to rebuild an array from a
//! flat buffer on the receiving side. Host arrays are `ndarray` arrays; device
//! tensors plug in through the optional `numr` adapter.

#[cfg(feature = "numr")]
pub mod numr_tensor;

use std::borrow::Cow;

use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn};

use crate::error::{Error, Result};

/// Host array type produced by `recv`.
pub type HostArray = ArrayD<f32>;

/// An `f32` array that can be handed to the bulk channel.
pub trait StageArray {
    /// Shape of the array, outermost dimension first.
    fn shape(&self) -> &[usize];

    /// Number of dimensions.
    fn ndim(&self) -> usize {
        StageArray::shape(self).len()
    }

    /// Total element count.
    fn numel(&self) -> usize {
        StageArray::shape(self).iter().product()
    }

    /// Whether the array lives in accelerator memory.
    fn is_device_resident(&self) -> bool {
        false
    }

    /// Block until any outstanding device work that produces this array is done.
    fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    /// Contiguous little-endian-native byte view of the elements in row-major order.
    fn stage(&self) -> Result<Cow<'_, [u8]>>;
}

impl<S, D> StageArray for ArrayBase<S, D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    fn shape(&self) -> &[usize] {
        ArrayBase::shape(self)
    }

    fn stage(&self) -> Result<Cow<'_, [u8]>> {
        match self.as_slice() {
            Some(elems) => Ok(Cow::Borrowed(bytemuck::cast_slice(elems))),
            // Non-standard layout (transposed, sliced): copy out in logical order
            None => {
                let elems: Vec<f32> = self.iter().copied().collect();
                Ok(Cow::Owned(bytemuck::cast_slice::<f32, u8>(&elems).to_vec()))
            }
        }
    }
}

/// Reshape a flat receive buffer into a host array.
pub fn reshape_received(data: Vec<f32>, shape: &[usize]) -> Result<HostArray> {
    let expected: usize = shape.iter().product();
    if data.len() != expected {
        return Err(Error::contract(format!(
            "buffer holds {} elements but shape {shape:?} needs {expected}",
            data.len()
        )));
    }
    ArrayD::from_shape_vec(IxDyn(shape), data)
        .map_err(|e| Error::contract(format!("cannot reshape to {shape:?}: {e}")))
}
