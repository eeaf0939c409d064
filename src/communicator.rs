//! Communicator facade.
//!
//! Wraps a process group with its topology, the point-to-point transfer protocol
//! and the lazily built hierarchical scopes. Model-wide collectives are provided by
//! strategies that compose a `Communicator` (see `crate::strategy`).

use std::fmt;
use std::sync::Arc;

use crate::array::{HostArray, StageArray};
use crate::config::CommunicatorConfig;
use crate::dataset::SCATTER_TAG;
use crate::error::{Error, Result};
use crate::group::device::unavailable;
use crate::group::{DeviceCollectiveBackend, NoDeviceCollectives, ProcessGroup};
use crate::hierarchy::{HierarchicalScopes, ScopeState};
use crate::message::{Payload, Value};
use crate::model::Model;
use crate::topology::{discover_topology, Topology};
use crate::transfer::{recv_payload, send_payload};

/// Model-wide synchronization implemented by a communication strategy.
pub trait CommunicationStrategy {
    /// Make every process hold the root's parameter values.
    fn broadcast_model_state(&mut self, model: &mut dyn Model) -> Result<()>;

    /// Replace every gradient with its average over all processes.
    fn all_reduce_gradients(&mut self, model: &mut dyn Model) -> Result<()>;
}

/// Topology-aware communicator over a process group.
///
/// # Usage
///
/// ```ignore
/// let mut comm = Communicator::with_device_backend(group, config, backend)?;
/// select_device(comm.topology().node_local_rank);
/// comm.ensure_scopes()?; // device context binds to the device selected above
/// ```
pub struct Communicator<G: ProcessGroup> {
    group: G,
    config: CommunicatorConfig,
    topology: Topology,
    device_backend: Option<Arc<dyn DeviceCollectiveBackend>>,
    scopes: ScopeState<G>,
}

impl<G: ProcessGroup> Communicator<G> {
    /// Communicator with default configuration and no device collectives.
    pub fn new(group: G) -> Result<Self> {
        Self::with_config(group, CommunicatorConfig::default())
    }

    pub fn with_config(group: G, config: CommunicatorConfig) -> Result<Self> {
        Self::with_device_backend(group, config, Arc::new(NoDeviceCollectives))
    }

    /// Communicator that builds device collectives with `backend` when
    /// `config.use_device_collectives` is set.
    ///
    /// # Errors
    ///
    /// `DeviceCollectiveUnavailable` if device collectives are requested and the
    /// backend reports itself unavailable. This is checked before topology discovery.
    pub fn with_device_backend(
        group: G,
        config: CommunicatorConfig,
        backend: Arc<dyn DeviceCollectiveBackend>,
    ) -> Result<Self> {
        let device_backend = if config.use_device_collectives {
            if !backend.is_available() {
                return Err(unavailable(backend.name()));
            }
            Some(backend)
        } else {
            None
        };

        let topology = discover_topology(&group)?;
        Ok(Self {
            group,
            config,
            topology,
            device_backend,
            scopes: ScopeState::Uninitialized,
        })
    }

    pub fn rank(&self) -> usize {
        self.group.rank()
    }

    pub fn size(&self) -> usize {
        self.group.size()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &CommunicatorConfig {
        &self.config
    }

    /// The underlying process group.
    pub fn group(&self) -> &G {
        &self.group
    }

    pub fn uses_device_collectives(&self) -> bool {
        self.device_backend.is_some()
    }

    /// Partition into a new communicator. Members with the same `color` end up
    /// together, ranked by `key`. The child rediscovers its topology and builds its
    /// own scopes; nothing already built here is shared with it.
    pub fn split(&self, color: u32, key: u32) -> Result<Self> {
        let group = self.group.split(color, key)?;
        let topology = discover_topology(&group)?;
        Ok(Self {
            group,
            config: self.config.clone(),
            topology,
            device_backend: self.device_backend.clone(),
            scopes: ScopeState::Uninitialized,
        })
    }

    /// Send an array or tuple of arrays to `dest`.
    ///
    /// `tag` must not be `dataset::SCATTER_TAG`.
    pub fn send<A: StageArray>(&self, payload: &Payload<A>, dest: usize, tag: u32) -> Result<()> {
        if tag == SCATTER_TAG {
            return Err(Error::InvalidArgument {
                arg: "tag",
                reason: format!("tag {tag:#x} is reserved for dataset scattering"),
            });
        }
        send_payload(&self.group, payload, dest, tag)
    }

    /// Validate a loosely typed value, then send it. Invalid values fail with
    /// `InvalidPayloadKind` before anything reaches the transport.
    pub fn send_value<A: StageArray>(&self, value: Value<A>, dest: usize, tag: u32) -> Result<()> {
        let payload = Payload::<A>::try_from(value)?;
        self.send(&payload, dest, tag)
    }

    /// Receive whatever `src` sent with `send` on `tag`.
    pub fn recv(&self, src: usize, tag: u32) -> Result<Payload<HostArray>> {
        recv_payload(&self.group, src, tag, self.config.max_header_bytes)
    }

    /// Build the hierarchical scopes on first call, reuse them afterwards.
    ///
    /// Collective over the whole group. Call it after selecting the compute device:
    /// device collectives bind to the device current at this point.
    pub fn ensure_scopes(&mut self) -> Result<&HierarchicalScopes<G>> {
        self.scopes
            .ensure(&self.group, &self.topology, self.device_backend.as_ref())
    }

    /// Scopes if already built; never triggers construction.
    pub fn scopes(&self) -> Option<&HierarchicalScopes<G>> {
        self.scopes.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.scopes.is_initialized()
    }
}

impl<G: ProcessGroup> CommunicationStrategy for Communicator<G> {
    fn broadcast_model_state(&mut self, _model: &mut dyn Model) -> Result<()> {
        Err(Error::NotImplemented {
            operation: "broadcast_model_state",
        })
    }

    fn all_reduce_gradients(&mut self, _model: &mut dyn Model) -> Result<()> {
        Err(Error::NotImplemented {
            operation: "all_reduce_gradients",
        })
    }
}

impl<G: ProcessGroup> fmt::Debug for Communicator<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .field("topology", &self.topology)
            .field("config", &self.config)
            .field("scopes", &self.scopes)
            .finish()
    }
}
