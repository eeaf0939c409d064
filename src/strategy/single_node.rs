//! Collectives for jobs that fit on one machine.

use crate::communicator::{CommunicationStrategy, Communicator};
use crate::error::{Error, Result};
use crate::group::{ProcessGroup, ReduceOp};
use crate::model::{pack, unpack, Field, Model};

use super::average;

/// Uses only the intra-node level. Rejects multi-node topologies.
pub struct SingleNodeStrategy<G: ProcessGroup> {
    comm: Communicator<G>,
}

impl<G: ProcessGroup> SingleNodeStrategy<G> {
    pub fn new(comm: Communicator<G>) -> Result<Self> {
        let nodes = comm.topology().node_count;
        if nodes != 1 {
            return Err(Error::InvalidArgument {
                arg: "comm",
                reason: format!("single-node strategy used across {nodes} nodes"),
            });
        }
        Ok(Self { comm })
    }

    pub fn communicator(&self) -> &Communicator<G> {
        &self.comm
    }

    pub fn into_inner(self) -> Communicator<G> {
        self.comm
    }
}

impl<G: ProcessGroup> CommunicationStrategy for SingleNodeStrategy<G> {
    fn broadcast_model_state(&mut self, model: &mut dyn Model) -> Result<()> {
        if self.comm.size() <= 1 {
            return Ok(());
        }
        let mut params = model.params_mut();
        let mut buf = pack(&params, Field::Data);
        let scopes = self.comm.ensure_scopes()?;
        match &scopes.device {
            Some(device) => device.broadcast(&mut buf, 0)?,
            None => scopes.intra.broadcast(&mut buf, 0)?,
        }
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
        match &scopes.device {
            Some(device) => device.all_reduce(&mut buf, ReduceOp::Sum)?,
            None => scopes.intra.all_reduce(&mut buf, ReduceOp::Sum)?,
        }
        average(&mut buf, world_size);
        unpack(&mut params, Field::Grad, &buf)
    }
}
