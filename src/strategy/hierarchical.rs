//! Two-level collectives: inside the node first, then across node representatives.

use crate::communicator::{CommunicationStrategy, Communicator};
use crate::error::Result;
use crate::group::{ProcessGroup, ReduceOp};
use crate::hierarchy::HierarchicalScopes;
use crate::model::{pack, unpack, Field, Model};

use super::average;

/// Node-level reduction followed by an inter-node all-reduce among
/// representatives and a node-level broadcast of the result.
///
/// Node-level steps use the device collective scope when the communicator was
/// configured with one, and the intra-node process scope otherwise.
pub struct HierarchicalStrategy<G: ProcessGroup> {
    comm: Communicator<G>,
}

impl<G: ProcessGroup> HierarchicalStrategy<G> {
    pub fn new(comm: Communicator<G>) -> Self {
        Self { comm }
    }

    pub fn communicator(&self) -> &Communicator<G> {
        &self.comm
    }

    pub fn into_inner(self) -> Communicator<G> {
        self.comm
    }
}

fn node_reduce<G: ProcessGroup>(scopes: &HierarchicalScopes<G>, buf: &mut [f32]) -> Result<()> {
    match &scopes.device {
        Some(device) => device.reduce(buf, ReduceOp::Sum, 0),
        None => scopes.intra.all_reduce(buf, ReduceOp::Sum),
    }
}

fn node_broadcast<G: ProcessGroup>(scopes: &HierarchicalScopes<G>, buf: &mut [f32]) -> Result<()> {
    match &scopes.device {
        Some(device) => {
            device.broadcast(buf, 0)?;
            device.synchronize()
        }
        None => scopes.intra.broadcast(buf, 0),
    }
}

impl<G: ProcessGroup> CommunicationStrategy for HierarchicalStrategy<G> {
    fn broadcast_model_state(&mut self, model: &mut dyn Model) -> Result<()> {
        if self.comm.size() <= 1 {
            return Ok(());
        }
        let mut params = model.params_mut();
        let mut buf = pack(&params, Field::Data);

        // Global rank 0 is the representative of node 0, i.e. inter rank 0
        let scopes = self.comm.ensure_scopes()?;
        if let Some(inter) = &scopes.inter {
            inter.broadcast(&mut buf, 0)?;
        }
        node_broadcast(scopes, &mut buf)?;

        unpack(&mut params, Field::Data, &buf)
    }

    fn all_reduce_gradients(&mut self, model: &mut dyn Model) -> Result<()> {
        let world_size = self.comm.size();
        if world_size <= 1 {
            return Ok(());
        }
        let mut params = model.params_mut();
        let mut buf = pack(&params, Field::Grad);
        if buf.is_empty() {
            return Ok(());
        }

        let scopes = self.comm.ensure_scopes()?;
        node_reduce(scopes, &mut buf)?;
        if let Some(inter) = &scopes.inter {
            inter.all_reduce(&mut buf, ReduceOp::Sum)?;
        }
        node_broadcast(scopes, &mut buf)?;

        average(&mut buf, world_size);
        unpack(&mut params, Field::Grad, &buf)
    }
}
