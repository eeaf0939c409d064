//! Packed single-buffer collectives over the base group.

use crate::communicator::{CommunicationStrategy, Communicator};
use crate::error::Result;
use crate::group::{ProcessGroup, ReduceOp};
use crate::model::{pack, unpack, Field, Model};

use super::average;

/// Packs every gradient into one buffer and issues a single all-reduce.
pub struct FlatStrategy<G: ProcessGroup> {
    comm: Communicator<G>,
}

impl<G: ProcessGroup> FlatStrategy<G> {
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

impl<G: ProcessGroup> CommunicationStrategy for FlatStrategy<G> {
    fn broadcast_model_state(&mut self, model: &mut dyn Model) -> Result<()> {
        if self.comm.size() <= 1 {
            return Ok(());
        }
        let mut params = model.params_mut();
        let mut buf = pack(&params, Field::Data);
        self.comm.group().broadcast(&mut buf, 0)?;
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
        self.comm.group().all_reduce(&mut buf, ReduceOp::Sum)?;
        average(&mut buf, world_size);
        unpack(&mut params, Field::Grad, &buf)
    }
}
