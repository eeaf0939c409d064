use std::sync::Arc;
use std::time::Duration;

use tiercomm::{
    Communicator, CommunicatorConfig, Error, HierarchicalScopes, LocalCluster,
    LocalClusterConfig, LocalDeviceBackend, LocalGroup, ProcessGroup, ReduceOp, Topology,
};

type Scopes = HierarchicalScopes<LocalGroup>;

fn quick() -> LocalClusterConfig {
    LocalClusterConfig::default().with_recv_timeout(Duration::from_secs(10))
}

#[derive(Debug, PartialEq)]
struct Observed {
    topology: Topology,
    intra_size: usize,
    intra_rank: usize,
    inter: Option<(usize, usize)>,
}

#[test]
fn test_four_processes_on_two_hosts() {
    let out = LocalCluster::run(&["A", "A", "B", "B"], quick(), |g| {
        let mut comm = Communicator::new(g).unwrap();
        assert!(!comm.is_initialized());
        let topology = comm.topology().clone();
        let scopes = comm.ensure_scopes().unwrap();
        Observed {
            topology,
            intra_size: scopes.intra.size(),
            intra_rank: scopes.intra.rank(),
            inter: scopes.inter.as_ref().map(|g| (g.rank(), g.size())),
        }
    });

    for (rank, obs) in out.iter().enumerate() {
        assert_eq!(obs.topology.global_rank, rank);
        assert_eq!(obs.topology.node_local_size, 2);
        assert_eq!(obs.topology.node_count, 2);
        assert_eq!(obs.topology.node_rank, rank / 2);
        assert_eq!(obs.topology.node_local_rank, rank % 2);
        assert_eq!(obs.intra_size, 2);
        assert_eq!(obs.intra_rank, rank % 2);
    }
    // Only the node representatives hold the inter-node scope
    assert_eq!(out[0].inter, Some((0, 2)));
    assert_eq!(out[1].inter, None);
    assert_eq!(out[2].inter, Some((1, 2)));
    assert_eq!(out[3].inter, None);
}

#[test]
fn test_intra_scope_reduces_per_node() {
    let out = LocalCluster::run(&["A", "B", "A", "B", "B"], quick(), |g| {
        let mut comm = Communicator::new(g).unwrap();
        let rank = comm.rank();
        let scopes = comm.ensure_scopes().unwrap();
        let mut buf = vec![rank as f32];
        scopes.intra.all_reduce(&mut buf, ReduceOp::Sum).unwrap();
        buf[0]
    });
    // Node A = {0, 2}, node B = {1, 3, 4}
    assert_eq!(out, vec![2.0, 8.0, 2.0, 8.0, 8.0]);
}

#[test]
fn test_topology_is_identical_across_ranks() {
    let hosts = ["n2", "n1", "n2", "n3", "n1", "n1"];
    let out = LocalCluster::run(&hosts, quick(), |g| {
        let comm = Communicator::new(g).unwrap();
        comm.topology().clone()
    });

    for (rank, topo) in out.iter().enumerate() {
        assert_eq!(*topo, Topology::from_hosts(rank, &hosts).unwrap());
        // Members of a node agree on its membership
        for &peer in &topo.local_ranks {
            assert_eq!(out[peer].local_ranks, topo.local_ranks);
            assert_eq!(out[peer].node_rank, topo.node_rank);
        }
    }
    // Nodes ordered by lowest global rank
    assert_eq!(out[0].node_rank, 0);
    assert_eq!(out[1].node_rank, 1);
    assert_eq!(out[3].node_rank, 2);
}

#[test]
fn test_ensure_scopes_is_idempotent() {
    let out = LocalCluster::run(&["A", "A", "B"], quick(), |g| {
        let mut comm = Communicator::new(g).unwrap();
        let before = comm.group().posted_messages();
        comm.ensure_scopes().unwrap();
        comm.group().barrier().unwrap();
        let built = comm.group().posted_messages();
        comm.group().barrier().unwrap();

        // Later calls hand back the scopes built by the first one
        let first: *const Scopes = comm.ensure_scopes().unwrap();
        let second: *const Scopes = comm.ensure_scopes().unwrap();
        let peeked = comm.scopes().map(|s| s as *const Scopes);
        comm.group().barrier().unwrap();
        (
            before < built,
            first == second && peeked == Some(first),
            comm.is_initialized(),
        )
    });
    assert!(out.iter().all(|&(grew, same, init)| grew && same && init));
}

#[test]
fn test_split_child_starts_uninitialized() {
    let out = LocalCluster::run(&["A", "A", "B", "B"], quick(), |g| {
        let mut parent = Communicator::new(g).unwrap();
        parent.ensure_scopes().unwrap();

        // Pair ranks across hosts: {0, 2} and {1, 3}
        let rank = parent.rank() as u32;
        let child = parent.split(rank % 2, rank).unwrap();
        (
            parent.is_initialized(),
            child.is_initialized(),
            child.rank(),
            child.size(),
            child.topology().clone(),
        )
    });

    for (rank, (parent_init, child_init, child_rank, child_size, topo)) in
        out.into_iter().enumerate()
    {
        assert!(parent_init);
        assert!(!child_init);
        assert_eq!(child_size, 2);
        assert_eq!(child_rank, rank / 2);
        // The child spans both hosts with one process each
        assert_eq!(topo.node_count, 2);
        assert_eq!(topo.node_local_size, 1);
        assert_eq!(topo.global_size, 2);
    }
}

#[test]
fn test_split_child_builds_its_own_scopes() {
    let out = LocalCluster::run(&["A", "A", "A", "B"], quick(), |g| {
        let parent = Communicator::new(g).unwrap();
        let color = u32::from(parent.rank() >= 2);
        let mut child = parent.split(color, 0).unwrap();
        let scopes = child.ensure_scopes().unwrap();
        let mut buf = vec![1.0f32];
        scopes.intra.all_reduce(&mut buf, ReduceOp::Sum).unwrap();
        (parent.is_initialized(), buf[0])
    });
    // child {0, 1} lives on A; child {2, 3} spans A and B
    assert_eq!(out, vec![(false, 2.0), (false, 2.0), (false, 1.0), (false, 1.0)]);
}

#[test]
fn test_unavailable_device_collectives_fail_at_construction() {
    let out = LocalCluster::run(&["A", "B"], quick(), |g| {
        let config = CommunicatorConfig::default().with_device_collectives(true);
        Communicator::with_device_backend(g, config, Arc::new(LocalDeviceBackend::unavailable()))
            .map(|_| ())
    });
    for result in out {
        assert!(matches!(result, Err(Error::DeviceCollectiveUnavailable { .. })));
    }
}

#[test]
fn test_device_scope_spans_node() {
    let out = LocalCluster::run(&["A", "A", "A", "B"], quick(), |g| {
        let backend = Arc::new(g.device_backend());
        let config = CommunicatorConfig::default().with_device_collectives(true);
        let mut comm = Communicator::with_device_backend(g, config, backend).unwrap();
        assert!(comm.uses_device_collectives());
        let rank = comm.rank();
        let scopes = comm.ensure_scopes().unwrap();
        let device = scopes.device.as_ref().unwrap();
        let mut buf = vec![rank as f32 + 1.0];
        device.all_reduce(&mut buf, ReduceOp::Max).unwrap();
        (device.rank(), device.size(), buf[0])
    });
    assert_eq!(out, vec![(0, 3, 3.0), (1, 3, 3.0), (2, 3, 3.0), (0, 1, 4.0)]);
}
