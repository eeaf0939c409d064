//! Process group boundary.
//!
//! `ProcessGroup` is the general-purpose process transport the communicator is
//! built on: rank bookkeeping, a deterministic split, a small-object channel for
//! headers and metadata, a bulk byte channel for array payloads, and the handful of
//! collectives the strategies need. All calls block until the operation completes
//! locally; a peer that never answers blocks forever unless the implementation has
//! its own timeout.

pub mod device;
pub mod local;
#[cfg(feature = "numr")]
pub mod numr_collectives;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use device::{DeviceCollective, DeviceCollectiveBackend, NoDeviceCollectives};
pub use local::{LocalCluster, LocalClusterConfig, LocalDeviceBackend, LocalGroup};
#[cfg(feature = "numr")]
pub use numr_collectives::NumrCollectives;

/// Element-wise reduction applied by all-reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
    Prod,
}

impl ReduceOp {
    /// Fold `src` into `dst` element-wise.
    pub fn apply(self, dst: &mut [f32], src: &[f32]) {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = match self {
                ReduceOp::Sum => *d + s,
                ReduceOp::Max => d.max(s),
                ReduceOp::Min => d.min(s),
                ReduceOp::Prod => *d * s,
            };
        }
    }
}

/// A fixed set of cooperating processes addressed by rank.
///
/// Collective methods (`all_gather_object`, `broadcast_object`, `all_reduce`,
/// `broadcast`, `barrier`, `split`) must be called by every member in the same
/// order. Handles are single-owner and not meant for concurrent use.
pub trait ProcessGroup: Send + Sized {
    /// Rank of the calling process within this group.
    fn rank(&self) -> usize;

    /// Number of processes in this group.
    fn size(&self) -> usize;

    /// Identity of the physical machine this process runs on.
    fn host_name(&self) -> Result<String>;

    /// Partition the group: members with equal `color` form a new group, ranked by
    /// `(key, old rank)`.
    fn split(&self, color: u32, key: u32) -> Result<Self>;

    /// Send a small structured message over the header channel.
    fn send_object(&self, data: &[u8], dest: usize, tag: u32) -> Result<()>;

    /// Receive a message sent with `send_object`.
    fn recv_object(&self, src: usize, tag: u32) -> Result<Vec<u8>>;

    /// Send a fixed-size binary payload over the bulk channel.
    fn send_bulk(&self, data: &[u8], dest: usize, tag: u32) -> Result<()>;

    /// Receive a bulk payload into `buf`; the incoming length must equal `buf.len()`.
    fn recv_bulk(&self, buf: &mut [u8], src: usize, tag: u32) -> Result<()>;

    /// Gather one object from every member, indexed by rank.
    fn all_gather_object(&self, data: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Distribute `data` from `root`; non-root callers pass `None`.
    fn broadcast_object(&self, data: Option<&[u8]>, root: usize) -> Result<Vec<u8>>;

    /// In-place all-reduce over `f32` elements.
    fn all_reduce(&self, buf: &mut [f32], op: ReduceOp) -> Result<()>;

    /// In-place broadcast of `f32` elements from `root`.
    fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()>;

    /// Block until every member has reached the barrier.
    fn barrier(&self) -> Result<()> {
        self.all_gather_object(&[]).map(|_| ())
    }
}
