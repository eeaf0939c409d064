//! Staging adapter for numr tensors.
//!
//! Device tensors are copied to the host before the bulk transfer; `to_vec` waits
//! for the producing kernels, which covers the synchronization requirement.

use std::borrow::Cow;

use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

use super::{HostArray, StageArray};
use crate::error::{Error, Result};

impl<R: Runtime<DType = DType>> StageArray for Tensor<R> {
    fn shape(&self) -> &[usize] {
        Tensor::shape(self)
    }

    fn is_device_resident(&self) -> bool {
        true
    }

    fn stage(&self) -> Result<Cow<'_, [u8]>> {
        if self.dtype() != DType::F32 {
            return Err(Error::InvalidArgument {
                arg: "tensor",
                reason: format!("bulk transfers carry F32 only, got {:?}", self.dtype()),
            });
        }
        let host = self.to_vec::<f32>();
        Ok(Cow::Owned(bytemuck::cast_slice::<f32, u8>(&host).to_vec()))
    }
}

/// Upload a received host array onto `device`.
pub fn to_tensor<R: Runtime<DType = DType>>(array: &HostArray, device: &R::Device) -> Tensor<R> {
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::<R>::from_slice(&data, array.shape(), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::Communicator;
    use crate::group::{LocalCluster, LocalClusterConfig};
    use crate::message::Payload;
    use ndarray::arr2;
    use numr::runtime::cpu::{CpuDevice, CpuRuntime};

    #[test]
    fn test_stage_f32_tensor() {
        let device = CpuDevice::new();
        let t = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0, 4.0], &[2, 2], &device);

        assert_eq!(StageArray::shape(&t), &[2, 2]);
        assert!(t.is_device_resident());
        let bytes = t.stage().unwrap();
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&bytes), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_stage_rejects_non_f32() {
        let device = CpuDevice::new();
        let t = Tensor::<CpuRuntime>::from_slice(&[0i64, 1, 2, 3], &[1, 4], &device);
        assert!(matches!(t.stage(), Err(Error::InvalidArgument { arg: "tensor", .. })));
    }

    #[test]
    fn test_to_tensor_keeps_shape_and_values() {
        let device = CpuDevice::new();
        let host = arr2(&[[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]]).into_dyn();
        let t = to_tensor::<CpuRuntime>(&host, &device);
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.to_vec::<f32>(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_tensor_sent_between_ranks() {
        let config = LocalClusterConfig::default().with_recv_timeout(std::time::Duration::from_secs(10));
        let out = LocalCluster::run(&["A", "B"], config, |g| {
            let device = CpuDevice::new();
            let comm = Communicator::new(g).unwrap();
            if comm.rank() == 0 {
                let t = Tensor::<CpuRuntime>::from_slice(&[0.5f32, -1.5, 2.0, 8.0], &[2, 2], &device);
                comm.send(&Payload::Single(t), 1, 3).unwrap();
                None
            } else {
                let host = comm.recv(0, 3).unwrap().into_single().unwrap();
                let t = to_tensor::<CpuRuntime>(&host, &device);
                Some((t.shape().to_vec(), t.to_vec::<f32>()))
            }
        });
        assert_eq!(out[1], Some((vec![2, 2], vec![0.5, -1.5, 2.0, 8.0])));
    }
}
