//! Concrete communication strategies.
//!
//! Each strategy owns a `Communicator` and implements `CommunicationStrategy`
//! with a different reduction layout:
//!
//! | Strategy | Gradients | Model state |
//! |---|---|---|
//! | `naive` | one all-reduce per parameter over the base group | one broadcast per parameter |
//! | `flat` | packed into one buffer, one all-reduce | packed, one broadcast |
//! | `hierarchical` | packed; node reduce, inter-node all-reduce, node broadcast | inter-node then node broadcast |
//! | `single_node` | packed; node all-reduce only | node broadcast |

mod flat;
mod hierarchical;
mod naive;
mod single_node;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::communicator::{CommunicationStrategy, Communicator};
use crate::error::{Error, Result};
use crate::group::ProcessGroup;

pub use flat::FlatStrategy;
pub use hierarchical::HierarchicalStrategy;
pub use naive::NaiveStrategy;
pub use single_node::SingleNodeStrategy;

/// Strategy selector, e.g. from a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Naive,
    Flat,
    Hierarchical,
    SingleNode,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Naive => "naive",
            StrategyKind::Flat => "flat",
            StrategyKind::Hierarchical => "hierarchical",
            StrategyKind::SingleNode => "single_node",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "naive" => Ok(StrategyKind::Naive),
            "flat" => Ok(StrategyKind::Flat),
            "hierarchical" => Ok(StrategyKind::Hierarchical),
            "single_node" => Ok(StrategyKind::SingleNode),
            other => Err(Error::InvalidArgument {
                arg: "strategy",
                reason: format!("unknown communication strategy '{other}'"),
            }),
        }
    }
}

/// Wrap `comm` in the strategy named by `kind`.
pub fn create_strategy<G>(
    kind: StrategyKind,
    comm: Communicator<G>,
) -> Result<Box<dyn CommunicationStrategy + Send>>
where
    G: ProcessGroup + 'static,
{
    tracing::info!(
        strategy = %kind,
        rank = comm.rank(),
        size = comm.size(),
        "creating communication strategy"
    );
    Ok(match kind {
        StrategyKind::Naive => Box::new(NaiveStrategy::new(comm)),
        StrategyKind::Flat => Box::new(FlatStrategy::new(comm)),
        StrategyKind::Hierarchical => Box::new(HierarchicalStrategy::new(comm)),
        StrategyKind::SingleNode => Box::new(SingleNodeStrategy::new(comm)?),
    })
}

/// Scale every element by `1 / world_size`.
pub(crate) fn average(buf: &mut [f32], world_size: usize) {
    let scale = 1.0 / world_size as f32;
    buf.iter_mut().for_each(|v| *v *= scale);
}
