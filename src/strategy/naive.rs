//! Per-parameter collectives over the base group.

use crate::communicator::{CommunicationStrategy, Communicator};
use crate::error::Result;
use crate::group::{ProcessGroup, ReduceOp};
use crate::model::Model;

use super::average;

/// One collective per parameter, no topology awareness.
///
/// Simple and correct on any layout; slow when the model has many small
/// parameters.
pub struct NaiveStrategy<G: ProcessGroup> {
    comm: Communicator<G>,
}

impl<G: ProcessGroup> NaiveStrategy<G> {
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

impl<G: ProcessGroup> CommunicationStrategy for NaiveStrategy<G> {
    fn broadcast_model_state(&mut self, model: &mut dyn Model) -> Result<()> {
        if self.comm.size() <= 1 {
            return Ok(());
        }
        let group = self.comm.group();
        for param in model.params_mut() {
            let mut buf: Vec<f32> = param.data.iter().copied().collect();
            group.broadcast(&mut buf, 0)?;
            param.data.iter_mut().zip(&buf).for_each(|(d, &s)| *d = s);
        }
        Ok(())
    }

    fn all_reduce_gradients(&mut self, model: &mut dyn Model) -> Result<()> {
        let world_size = self.comm.size();
        if world_size <= 1 {
            return Ok(());
        }
        let group = self.comm.group();
        for param in model.params_mut() {
            let Some(grad) = param.grad.as_mut() else {
                continue;
            };
            let mut buf: Vec<f32> = grad.iter().copied().collect();
            group.all_reduce(&mut buf, ReduceOp::Sum)?;
            average(&mut buf, world_size);
            grad.iter_mut().zip(&buf).for_each(|(d, &s)| *d = s);
        }
        Ok(())
    }
}
