//! Node topology discovery.
//!
//! Every process learns the host of every other process through one all-gather,
//! then computes the same partitioning locally:
//! - ranks on one host form a node; node-local ranks follow global rank order
//! - nodes are numbered by their lowest global rank
//! - the node-local rank 0 process is the node's representative

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::group::ProcessGroup;

/// Placement of one process in the two-level hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub global_rank: usize,
    pub global_size: usize,
    pub node_local_rank: usize,
    pub node_local_size: usize,
    pub node_rank: usize,
    pub node_count: usize,
    /// Global ranks sharing this node, ascending.
    pub local_ranks: Vec<usize>,
}

impl Topology {
    /// Compute the placement of `rank` given the host of every rank.
    pub fn from_hosts<S: AsRef<str>>(rank: usize, hosts: &[S]) -> Result<Self> {
        if rank >= hosts.len() {
            return Err(Error::InvalidArgument {
                arg: "rank",
                reason: format!("rank {rank} is outside group of size {}", hosts.len()),
            });
        }

        // Nodes in order of first appearance == order of lowest global rank
        let mut node_of_host: HashMap<&str, usize> = HashMap::new();
        let mut nodes: Vec<Vec<usize>> = Vec::new();
        for (global_rank, host) in hosts.iter().enumerate() {
            let node = *node_of_host.entry(host.as_ref()).or_insert_with(|| {
                nodes.push(Vec::new());
                nodes.len() - 1
            });
            nodes[node].push(global_rank);
        }

        let node_rank = node_of_host[hosts[rank].as_ref()];
        let local_ranks = nodes[node_rank].clone();
        let node_local_rank = local_ranks
            .iter()
            .position(|&r| r == rank)
            .ok_or_else(|| Error::contract("rank missing from its own node"))?;

        Ok(Self {
            global_rank: rank,
            global_size: hosts.len(),
            node_local_rank,
            node_local_size: local_ranks.len(),
            node_rank,
            node_count: nodes.len(),
            local_ranks,
        })
    }

    /// Whether this process represents its node in the inter-node scope.
    pub fn is_representative(&self) -> bool {
        self.node_local_rank == 0
    }

    /// Global rank of this node's representative.
    pub fn lead_rank(&self) -> usize {
        self.local_ranks[0]
    }

    pub fn is_single_node(&self) -> bool {
        self.node_count == 1
    }
}

/// Exchange host names over `group` and compute the caller's placement.
pub fn discover_topology<G: ProcessGroup>(group: &G) -> Result<Topology> {
    let host = group.host_name()?;
    let hosts = group
        .all_gather_object(host.as_bytes())?
        .into_iter()
        .map(|bytes| {
            String::from_utf8(bytes)
                .map_err(|e| Error::contract(format!("peer host name is not UTF-8: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let topo = Topology::from_hosts(group.rank(), &hosts)?;
    tracing::debug!(
        rank = topo.global_rank,
        node_rank = topo.node_rank,
        node_count = topo.node_count,
        node_local_rank = topo.node_local_rank,
        node_local_size = topo.node_local_size,
        "discovered topology"
    );
    Ok(topo)
}
