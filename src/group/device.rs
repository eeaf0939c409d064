//! Device collective boundary.
//!
//! Mirrors the NCCL bootstrap: a check for library availability, a unique id
//! generated on one member and distributed out of band, then per-member
//! construction of the communicator bound to the current device.

use crate::error::{Error, Result};
use crate::group::ReduceOp;

/// Factory for device-level collective contexts.
pub trait DeviceCollectiveBackend: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the collective library is linked and loadable.
    fn is_available(&self) -> bool;

    /// Generate the rendezvous id one member shares with the others.
    fn unique_id(&self) -> Result<Vec<u8>>;

    /// Join the context identified by `id` as `rank` of `size` members.
    fn init_comm(&self, id: &[u8], rank: usize, size: usize) -> Result<Box<dyn DeviceCollective>>;
}

/// A device-level collective context over a fixed membership.
pub trait DeviceCollective: Send {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// In-place all-reduce.
    fn all_reduce(&self, buf: &mut [f32], op: ReduceOp) -> Result<()>;

    /// In-place reduce onto `root`. Non-root buffers are left unspecified.
    fn reduce(&self, buf: &mut [f32], op: ReduceOp, root: usize) -> Result<()> {
        let _ = root;
        self.all_reduce(buf, op)
    }

    /// In-place broadcast from `root`.
    fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()>;

    /// Wait for queued device work on this context's stream.
    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

/// Backend for builds without a device collective library.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDeviceCollectives;

impl DeviceCollectiveBackend for NoDeviceCollectives {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn unique_id(&self) -> Result<Vec<u8>> {
        Err(unavailable(self.name()))
    }

    fn init_comm(&self, _id: &[u8], _rank: usize, _size: usize) -> Result<Box<dyn DeviceCollective>> {
        Err(unavailable(self.name()))
    }
}

pub(crate) fn unavailable(backend: &str) -> Error {
    Error::DeviceCollectiveUnavailable {
        reason: format!(
            "backend '{backend}' cannot be loaded; confirm the collective library can be \
             found by the dynamic linker"
        ),
    }
}
