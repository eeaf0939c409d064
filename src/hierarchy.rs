//! Lazily built intra-node and inter-node scopes.
//!
//! Device collective contexts bind to whatever device is current when they are
//! created, so scopes are not built when the communicator is constructed. The
//! first collective call moves the state from `Uninitialized` to `Initialized`;
//! later calls reuse what was built.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::group::{DeviceCollective, DeviceCollectiveBackend, ProcessGroup};
use crate::topology::Topology;

/// Communication scopes derived from the topology.
pub struct HierarchicalScopes<G> {
    /// All processes on this node, ranked by node-local rank.
    pub intra: G,
    /// One process per node, ranked by node rank. Only the representative holds it.
    pub inter: Option<G>,
    /// Device collectives over the intra-node membership, when requested.
    pub device: Option<Box<dyn DeviceCollective>>,
}

impl<G: ProcessGroup> HierarchicalScopes<G> {
    /// Build the scopes. Collective over the base group: every member must call it.
    pub(crate) fn build(
        base: &G,
        topo: &Topology,
        device_backend: Option<&Arc<dyn DeviceCollectiveBackend>>,
    ) -> Result<Self> {
        let intra = base.split(topo.node_rank as u32, topo.node_local_rank as u32)?;
        let column = base.split(topo.node_local_rank as u32, topo.node_rank as u32)?;
        let inter = topo.is_representative().then_some(column);

        let device = match device_backend {
            Some(backend) => Some(init_device_collectives(&intra, backend.as_ref())?),
            None => None,
        };

        tracing::debug!(
            rank = topo.global_rank,
            intra_size = intra.size(),
            inter_size = ?inter.as_ref().map(ProcessGroup::size),
            device = device.is_some(),
            "built hierarchical scopes"
        );
        Ok(Self {
            intra,
            inter,
            device,
        })
    }
}

/// Node lead generates the rendezvous id, shares it over the intra scope, then
/// every node member joins.
fn init_device_collectives<G: ProcessGroup>(
    intra: &G,
    backend: &dyn DeviceCollectiveBackend,
) -> Result<Box<dyn DeviceCollective>> {
    let id = if intra.rank() == 0 {
        let id = backend.unique_id()?;
        intra.broadcast_object(Some(id.as_slice()), 0)?
    } else {
        intra.broadcast_object(None, 0)?
    };
    backend.init_comm(&id, intra.rank(), intra.size())
}

impl<G> fmt::Debug for HierarchicalScopes<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalScopes")
            .field("inter", &self.inter.is_some())
            .field("device", &self.device.is_some())
            .finish_non_exhaustive()
    }
}

/// Two-state lifecycle of the hierarchical scopes.
pub enum ScopeState<G> {
    Uninitialized,
    Initialized(HierarchicalScopes<G>),
}

impl<G> Default for ScopeState<G> {
    fn default() -> Self {
        ScopeState::Uninitialized
    }
}

impl<G> fmt::Debug for ScopeState<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeState::Uninitialized => f.write_str("Uninitialized"),
            ScopeState::Initialized(scopes) => f.debug_tuple("Initialized").field(scopes).finish(),
        }
    }
}

impl<G: ProcessGroup> ScopeState<G> {
    pub fn is_initialized(&self) -> bool {
        matches!(self, ScopeState::Initialized(_))
    }

    pub fn get(&self) -> Option<&HierarchicalScopes<G>> {
        match self {
            ScopeState::Initialized(scopes) => Some(scopes),
            ScopeState::Uninitialized => None,
        }
    }

    /// Build on first call, reuse afterwards. A failed build leaves the state
    /// `Uninitialized`.
    pub(crate) fn ensure(
        &mut self,
        base: &G,
        topo: &Topology,
        device_backend: Option<&Arc<dyn DeviceCollectiveBackend>>,
    ) -> Result<&HierarchicalScopes<G>> {
        let scopes = match std::mem::take(self) {
            ScopeState::Initialized(scopes) => scopes,
            ScopeState::Uninitialized => HierarchicalScopes::build(base, topo, device_backend)?,
        };
        *self = ScopeState::Initialized(scopes);
        let ScopeState::Initialized(scopes) = self else {
            return Err(Error::contract("hierarchical scopes missing after build"));
        };
        Ok(&*scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{LocalCluster, LocalClusterConfig, LocalGroup};
    use crate::topology::discover_topology;
    use std::time::Duration;

    fn quick() -> LocalClusterConfig {
        LocalClusterConfig::default().with_recv_timeout(Duration::from_secs(10))
    }

    #[test]
    fn test_ensure_builds_once() {
        let out = LocalCluster::run(&["A", "A", "B", "B"], quick(), |g| {
            let topo = discover_topology(&g).unwrap();
            let mut state: ScopeState<LocalGroup> = ScopeState::Uninitialized;
            assert!(!state.is_initialized());

            let first = {
                let s = state.ensure(&g, &topo, None).unwrap();
                (s.intra.size(), s.intra.rank(), s.inter.as_ref().map(|i| (i.rank(), i.size())))
            };
            let second = {
                let s = state.ensure(&g, &topo, None).unwrap();
                (s.intra.size(), s.intra.rank(), s.inter.as_ref().map(|i| (i.rank(), i.size())))
            };
            assert!(state.is_initialized());
            (first, second)
        });
        for (rank, (first, second)) in out.iter().enumerate() {
            assert_eq!(first, second);
            assert_eq!(first.0, 2);
            assert_eq!(first.1, rank % 2);
            let expected_inter = if rank % 2 == 0 { Some((rank / 2, 2)) } else { None };
            assert_eq!(first.2, expected_inter);
        }
    }

    #[test]
    fn test_failed_build_stays_uninitialized() {
        let g = LocalCluster::new(&["solo"], quick()).remove(0);
        let topo = discover_topology(&g).unwrap();
        let broken: Arc<dyn DeviceCollectiveBackend> =
            Arc::new(crate::group::LocalDeviceBackend::unavailable());
        let mut state: ScopeState<LocalGroup> = ScopeState::Uninitialized;

        let err = state.ensure(&g, &topo, Some(&broken)).unwrap_err();
        assert!(matches!(err, Error::DeviceCollectiveUnavailable { .. }));
        assert!(!state.is_initialized());

        let scopes = state.ensure(&g, &topo, None).unwrap();
        assert_eq!(scopes.intra.size(), 1);
        assert!(scopes.device.is_none());
        assert!(state.is_initialized());
    }

    #[test]
    fn test_device_scope_over_intra_membership() {
        let out = LocalCluster::run(&["A", "A", "A", "B"], quick(), |g| {
            let topo = discover_topology(&g).unwrap();
            let backend: Arc<dyn DeviceCollectiveBackend> = Arc::new(g.device_backend());
            let mut state: ScopeState<LocalGroup> = ScopeState::Uninitialized;
            let scopes = state.ensure(&g, &topo, Some(&backend)).unwrap();
            let device = scopes.device.as_ref().unwrap();
            let mut buf = vec![1.0f32];
            device.all_reduce(&mut buf, crate::group::ReduceOp::Sum).unwrap();
            (device.rank(), device.size(), buf[0])
        });
        assert_eq!(out, vec![(0, 3, 3.0), (1, 3, 3.0), (2, 3, 3.0), (0, 1, 1.0)]);
    }
}
