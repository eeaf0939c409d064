//! Device collectives over a numr communicator.
//!
//! The caller bootstraps the numr communicator over exactly the processes of one
//! node (for example an NCCL communicator per node), so there is no id to share.
//! Each collective uploads the buffer to the communicator's device, runs the
//! raw-pointer operation in place, syncs, and copies the result back.

use std::sync::Arc;

use numr::dtype::DType;
use numr::runtime::{Communicator, ReduceOp as NumrReduceOp, Runtime};
use numr::tensor::Tensor;

use super::device::{DeviceCollective, DeviceCollectiveBackend};
use super::ReduceOp;
use crate::error::{Error, Result};

/// `DeviceCollectiveBackend` backed by a per-node numr communicator.
pub struct NumrCollectives<R: Runtime> {
    comm: Arc<dyn Communicator>,
    device: R::Device,
}

impl<R: Runtime> NumrCollectives<R> {
    /// `comm` must span the processes of this node, ranked by node-local rank.
    pub fn new(comm: Arc<dyn Communicator>, device: R::Device) -> Self {
        Self { comm, device }
    }
}

impl<R> DeviceCollectiveBackend for NumrCollectives<R>
where
    R: Runtime<DType = DType> + 'static,
    R::Device: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "numr"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn unique_id(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn init_comm(&self, _id: &[u8], rank: usize, size: usize) -> Result<Box<dyn DeviceCollective>> {
        let (comm_rank, comm_size) = (self.comm.rank(), self.comm.world_size());
        if rank != comm_rank || size != comm_size {
            return Err(Error::contract(format!(
                "numr communicator is rank {comm_rank} of {comm_size}, \
                 node scope expects rank {rank} of {size}"
            )));
        }
        Ok(Box::new(NumrDeviceComm::<R> {
            comm: Arc::clone(&self.comm),
            device: self.device.clone(),
        }))
    }
}

struct NumrDeviceComm<R: Runtime> {
    comm: Arc<dyn Communicator>,
    device: R::Device,
}

fn numr_op(op: ReduceOp) -> NumrReduceOp {
    match op {
        ReduceOp::Sum => NumrReduceOp::Sum,
        ReduceOp::Max => NumrReduceOp::Max,
        ReduceOp::Min => NumrReduceOp::Min,
        ReduceOp::Prod => NumrReduceOp::Prod,
    }
}

impl<R: Runtime<DType = DType>> NumrDeviceComm<R> {
    fn upload(&self, buf: &[f32]) -> Result<Tensor<R>> {
        let tensor = Tensor::<R>::from_slice(buf, &[buf.len()], &self.device);
        if !tensor.is_contiguous() {
            return Err(Error::contract("numr collective requires a contiguous tensor"));
        }
        Ok(tensor)
    }

    fn download(&self, tensor: &Tensor<R>, buf: &mut [f32]) -> Result<()> {
        self.synchronize_comm()?;
        buf.copy_from_slice(&tensor.to_vec::<f32>());
        Ok(())
    }

    fn synchronize_comm(&self) -> Result<()> {
        self.comm
            .sync()
            .map_err(|e| Error::transport(format!("numr sync failed: {e}")))
    }
}

impl<R> DeviceCollective for NumrDeviceComm<R>
where
    R: Runtime<DType = DType>,
    R::Device: Send,
{
    fn rank(&self) -> usize {
        self.comm.rank()
    }

    fn size(&self) -> usize {
        self.comm.world_size()
    }

    fn all_reduce(&self, buf: &mut [f32], op: ReduceOp) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let tensor = self.upload(buf)?;

        // Safety: tensor is contiguous, ptr is a valid device pointer with `numel` F32 elements
        unsafe {
            self.comm
                .all_reduce(tensor.data_ptr(), tensor.numel(), tensor.dtype(), numr_op(op))
                .map_err(|e| Error::transport(format!("numr all_reduce failed: {e}")))?;
        }

        self.download(&tensor, buf)
    }

    fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let tensor = self.upload(buf)?;

        // Safety: tensor is contiguous, ptr is a valid device pointer
        unsafe {
            self.comm
                .broadcast(tensor.data_ptr(), tensor.numel(), tensor.dtype(), root)
                .map_err(|e| Error::transport(format!("numr broadcast from {root} failed: {e}")))?;
        }

        self.download(&tensor, buf)
    }

    fn synchronize(&self) -> Result<()> {
        self.synchronize_comm()
    }
}
