//! In-process transport.
//!
//! Every rank is a thread holding its own `LocalGroup`; all groups of one cluster
//! share a mailbox table keyed by (context, src, dst, channel, tag). Messages on a
//! key are delivered in FIFO order, which gives the same per-pair ordering an MPI
//! transport gives. Each split creates a new context, so traffic of a sub-group
//! never mixes with its parent's.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;

use super::device::{unavailable, DeviceCollective, DeviceCollectiveBackend};
use super::{ProcessGroup, ReduceOp};
use crate::error::{Error, Result};

const GATHER_TAG: u32 = 0;
const BCAST_TAG: u32 = 1;

/// In-process cluster configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LocalClusterConfig {
    /// Fail blocking receives after this long instead of waiting forever.
    pub recv_timeout: Option<Duration>,
}

impl LocalClusterConfig {
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    Object,
    Bulk,
    Collective,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MailKey {
    context: Arc<str>,
    src: usize,
    dst: usize,
    channel: Channel,
    tag: u32,
}

struct LocalWorld {
    mail: Mutex<HashMap<MailKey, VecDeque<Vec<u8>>>>,
    arrived: Condvar,
    config: LocalClusterConfig,
    next_device_id: AtomicU64,
    posted: AtomicUsize,
}

/// Factory for in-process process groups.
pub struct LocalCluster;

impl LocalCluster {
    /// Create one group handle per entry of `hosts`; entry `i` is global rank `i`
    /// running on machine `hosts[i]`.
    pub fn new<S: AsRef<str>>(hosts: &[S], config: LocalClusterConfig) -> Vec<LocalGroup> {
        let world = Arc::new(LocalWorld {
            mail: Mutex::new(HashMap::new()),
            arrived: Condvar::new(),
            config,
            next_device_id: AtomicU64::new(0),
            posted: AtomicUsize::new(0),
        });
        let context: Arc<str> = Arc::from("world");
        let size = hosts.len();
        hosts
            .iter()
            .enumerate()
            .map(|(rank, host)| LocalGroup {
                endpoint: Endpoint {
                    world: Arc::clone(&world),
                    context: Arc::clone(&context),
                    rank,
                    size,
                },
                host: Arc::from(host.as_ref()),
                splits: Cell::new(0),
            })
            .collect()
    }

    /// Run `f` on one thread per rank and collect the results in rank order.
    ///
    /// A panic on any rank is re-raised on the caller after all threads finish.
    pub fn run<S, T, F>(hosts: &[S], config: LocalClusterConfig, f: F) -> Vec<T>
    where
        S: AsRef<str>,
        T: Send + 'static,
        F: Fn(LocalGroup) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let handles: Vec<_> = Self::new(hosts, config)
            .into_iter()
            .map(|group| {
                let f = Arc::clone(&f);
                thread::spawn(move || f(group))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        let mut panic = None;
        for handle in handles {
            match handle.join() {
                Ok(v) => results.push(v),
                Err(payload) => {
                    panic.get_or_insert(payload);
                }
            }
        }
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        results
    }
}

#[derive(Clone)]
struct Endpoint {
    world: Arc<LocalWorld>,
    context: Arc<str>,
    rank: usize,
    size: usize,
}

impl Endpoint {
    fn key(&self, channel: Channel, src: usize, dst: usize, tag: u32) -> MailKey {
        MailKey {
            context: Arc::clone(&self.context),
            src,
            dst,
            channel,
            tag,
        }
    }

    fn check_peer(&self, peer: usize, arg: &'static str) -> Result<()> {
        if peer >= self.size {
            return Err(Error::InvalidArgument {
                arg,
                reason: format!("rank {peer} is outside group of size {}", self.size),
            });
        }
        Ok(())
    }

    fn post(&self, channel: Channel, dest: usize, tag: u32, data: Vec<u8>) -> Result<()> {
        self.check_peer(dest, "dest")?;
        let key = self.key(channel, self.rank, dest, tag);
        self.world.mail.lock().entry(key).or_default().push_back(data);
        self.world.posted.fetch_add(1, Ordering::Relaxed);
        self.world.arrived.notify_all();
        Ok(())
    }

    fn take(&self, channel: Channel, src: usize, tag: u32) -> Result<Vec<u8>> {
        self.check_peer(src, "src")?;
        let key = self.key(channel, src, self.rank, tag);
        let deadline = self.world.config.recv_timeout.map(|t| Instant::now() + t);

        let mut mail = self.world.mail.lock();
        loop {
            if let Some(data) = mail.get_mut(&key).and_then(VecDeque::pop_front) {
                return Ok(data);
            }
            match deadline {
                None => self.world.arrived.wait(&mut mail),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::transport(format!(
                            "timed out waiting for {channel:?} message from rank {src} \
                             (tag {tag}, context {})",
                            self.context
                        )));
                    }
                    self.world.arrived.wait_for(&mut mail, deadline - now);
                }
            }
        }
    }

    fn all_gather(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            self.post(Channel::Collective, peer, GATHER_TAG, data.to_vec())?;
        }
        (0..self.size)
            .map(|peer| {
                if peer == self.rank {
                    Ok(data.to_vec())
                } else {
                    self.take(Channel::Collective, peer, GATHER_TAG)
                }
            })
            .collect()
    }

    fn broadcast_bytes(&self, data: Option<&[u8]>, root: usize) -> Result<Vec<u8>> {
        self.check_peer(root, "root")?;
        if self.rank != root {
            return self.take(Channel::Collective, root, BCAST_TAG);
        }
        let data = data.ok_or_else(|| Error::InvalidArgument {
            arg: "data",
            reason: "broadcast root must supply the payload".to_string(),
        })?;
        for peer in (0..self.size).filter(|&p| p != root) {
            self.post(Channel::Collective, peer, BCAST_TAG, data.to_vec())?;
        }
        Ok(data.to_vec())
    }

    fn all_reduce(&self, buf: &mut [f32], op: ReduceOp) -> Result<()> {
        let gathered = self.all_gather(bytemuck::cast_slice::<f32, u8>(buf))?;
        // Fold in rank order so every member computes bit-identical results
        let mut acc = decode_f32(&gathered[0], buf.len())?;
        for bytes in &gathered[1..] {
            op.apply(&mut acc, &decode_f32(bytes, buf.len())?);
        }
        buf.copy_from_slice(&acc);
        Ok(())
    }

    fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()> {
        let data = if self.rank == root {
            Some(bytemuck::cast_slice::<f32, u8>(buf).to_vec())
        } else {
            None
        };
        let received = self.broadcast_bytes(data.as_deref(), root)?;
        buf.copy_from_slice(&decode_f32(&received, buf.len())?);
        Ok(())
    }
}

fn decode_f32(bytes: &[u8], expected: usize) -> Result<Vec<f32>> {
    if bytes.len() != expected * std::mem::size_of::<f32>() {
        return Err(Error::contract(format!(
            "collective peer contributed {} bytes, expected {} f32 elements",
            bytes.len(),
            expected
        )));
    }
    let mut out = vec![0f32; expected];
    bytemuck::cast_slice_mut::<f32, u8>(&mut out).copy_from_slice(bytes);
    Ok(out)
}

/// One rank's handle onto an in-process cluster.
pub struct LocalGroup {
    endpoint: Endpoint,
    host: Arc<str>,
    splits: Cell<u64>,
}

impl LocalGroup {
    /// An available device collective backend sharing this cluster's mailboxes.
    pub fn device_backend(&self) -> LocalDeviceBackend {
        LocalDeviceBackend {
            world: Some(Arc::clone(&self.endpoint.world)),
        }
    }

    /// Total number of messages posted anywhere in this cluster so far.
    pub fn posted_messages(&self) -> usize {
        self.endpoint.world.posted.load(Ordering::Relaxed)
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        self.endpoint.rank
    }

    fn size(&self) -> usize {
        self.endpoint.size
    }

    fn host_name(&self) -> Result<String> {
        Ok(self.host.to_string())
    }

    fn split(&self, color: u32, key: u32) -> Result<Self> {
        let seq = self.splits.get();
        self.splits.set(seq + 1);

        let gathered = self.endpoint.all_gather(&serde_json::to_vec(&(color, key))?)?;
        let mut members = Vec::new();
        for (old_rank, bytes) in gathered.iter().enumerate() {
            let (c, k): (u32, u32) = serde_json::from_slice(bytes)?;
            if c == color {
                members.push((k, old_rank));
            }
        }
        members.sort_unstable();

        let rank = members
            .iter()
            .position(|&(_, r)| r == self.endpoint.rank)
            .ok_or_else(|| Error::transport("split lost the calling rank"))?;
        let context: Arc<str> = Arc::from(format!("{}/{seq}:{color}", self.endpoint.context));
        tracing::trace!(%context, rank, size = members.len(), "split local group");

        Ok(LocalGroup {
            endpoint: Endpoint {
                world: Arc::clone(&self.endpoint.world),
                context,
                rank,
                size: members.len(),
            },
            host: Arc::clone(&self.host),
            splits: Cell::new(0),
        })
    }

    fn send_object(&self, data: &[u8], dest: usize, tag: u32) -> Result<()> {
        self.endpoint.post(Channel::Object, dest, tag, data.to_vec())
    }

    fn recv_object(&self, src: usize, tag: u32) -> Result<Vec<u8>> {
        self.endpoint.take(Channel::Object, src, tag)
    }

    fn send_bulk(&self, data: &[u8], dest: usize, tag: u32) -> Result<()> {
        self.endpoint.post(Channel::Bulk, dest, tag, data.to_vec())
    }

    fn recv_bulk(&self, buf: &mut [u8], src: usize, tag: u32) -> Result<()> {
        let data = self.endpoint.take(Channel::Bulk, src, tag)?;
        if data.len() != buf.len() {
            return Err(Error::contract(format!(
                "bulk transfer from rank {src} carried {} bytes, receiver expected {}",
                data.len(),
                buf.len()
            )));
        }
        buf.copy_from_slice(&data);
        Ok(())
    }

    fn all_gather_object(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.endpoint.all_gather(data)
    }

    fn broadcast_object(&self, data: Option<&[u8]>, root: usize) -> Result<Vec<u8>> {
        self.endpoint.broadcast_bytes(data, root)
    }

    fn all_reduce(&self, buf: &mut [f32], op: ReduceOp) -> Result<()> {
        self.endpoint.all_reduce(buf, op)
    }

    fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()> {
        self.endpoint.broadcast(buf, root)
    }
}

/// Device collective backend over the in-process mailboxes.
pub struct LocalDeviceBackend {
    world: Option<Arc<LocalWorld>>,
}

impl LocalDeviceBackend {
    /// A backend whose library check fails.
    pub fn unavailable() -> Self {
        Self { world: None }
    }
}

impl DeviceCollectiveBackend for LocalDeviceBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn is_available(&self) -> bool {
        self.world.is_some()
    }

    fn unique_id(&self) -> Result<Vec<u8>> {
        let world = self.world.as_ref().ok_or_else(|| unavailable(self.name()))?;
        let id = world.next_device_id.fetch_add(1, Ordering::Relaxed);
        Ok(id.to_le_bytes().to_vec())
    }

    fn init_comm(&self, id: &[u8], rank: usize, size: usize) -> Result<Box<dyn DeviceCollective>> {
        let world = self.world.as_ref().ok_or_else(|| unavailable(self.name()))?;
        let id: [u8; 8] = id
            .try_into()
            .map_err(|_| Error::contract(format!("device id must be 8 bytes, got {}", id.len())))?;
        if rank >= size {
            return Err(Error::InvalidArgument {
                arg: "rank",
                reason: format!("rank {rank} is outside device group of size {size}"),
            });
        }
        Ok(Box::new(LocalDeviceComm {
            endpoint: Endpoint {
                world: Arc::clone(world),
                context: Arc::from(format!("device:{}", u64::from_le_bytes(id))),
                rank,
                size,
            },
        }))
    }
}

struct LocalDeviceComm {
    endpoint: Endpoint,
}

impl DeviceCollective for LocalDeviceComm {
    fn rank(&self) -> usize {
        self.endpoint.rank
    }

    fn size(&self) -> usize {
        self.endpoint.size
    }

    fn all_reduce(&self, buf: &mut [f32], op: ReduceOp) -> Result<()> {
        self.endpoint.all_reduce(buf, op)
    }

    fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<()> {
        self.endpoint.broadcast(buf, root)
    }
}
