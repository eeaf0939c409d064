use std::sync::Arc;
use std::time::Duration;

use ndarray::{arr1, arr2, ArrayD};
use tiercomm::{
    create_strategy, CommunicationStrategy, Communicator, CommunicatorConfig, Error,
    HierarchicalStrategy, LocalCluster, LocalClusterConfig, Parameter, ParameterSet, ProcessGroup,
    SingleNodeStrategy, StrategyKind,
};

const HOSTS: [&str; 4] = ["A", "A", "B", "B"];
const ALL_KINDS: [StrategyKind; 4] = [
    StrategyKind::Naive,
    StrategyKind::Flat,
    StrategyKind::Hierarchical,
    StrategyKind::SingleNode,
];

fn quick() -> LocalClusterConfig {
    LocalClusterConfig::default().with_recv_timeout(Duration::from_secs(10))
}

/// Rank-dependent model: data = rank, grads = rank + 1 (and its multiples).
fn model_for(rank: usize) -> ParameterSet {
    let r = rank as f32;
    let mut set = ParameterSet::new();
    set.insert(
        Parameter::new("w", arr2(&[[r, r], [r, r]]).into_dyn())
            .with_grad(arr2(&[[r + 1.0, 2.0 * (r + 1.0)], [0.0, -(r + 1.0)]]).into_dyn()),
    );
    set.insert(
        Parameter::new("b", arr1(&[r, r, r]).into_dyn())
            .with_grad(arr1(&[10.0 * (r + 1.0), 1.0, r]).into_dyn()),
    );
    set.insert(Parameter::new("frozen", arr1(&[r]).into_dyn()));
    set
}

fn grad(set: &ParameterSet, name: &str) -> Vec<f32> {
    set.get(name).unwrap().grad.as_ref().unwrap().iter().copied().collect()
}

fn data(set: &ParameterSet, name: &str) -> ArrayD<f32> {
    set.get(name).unwrap().data.clone()
}

fn run_strategy(
    hosts: &'static [&'static str],
    kind: StrategyKind,
    config: CommunicatorConfig,
    with_device: bool,
) -> Vec<ParameterSet> {
    LocalCluster::run(hosts, quick(), move |g| {
        let rank = g.rank();
        let comm = if with_device {
            let backend = Arc::new(g.device_backend());
            Communicator::with_device_backend(g, config.clone(), backend).unwrap()
        } else {
            Communicator::with_config(g, config.clone()).unwrap()
        };
        let mut strategy = create_strategy(kind, comm).unwrap();
        let mut model = model_for(rank);
        strategy.all_reduce_gradients(&mut model).unwrap();
        model
    })
}

fn assert_averaged(models: &[ParameterSet]) {
    let n = models.len() as f32;
    // mean over ranks of (r + 1) for r in 0..n
    let m = (n + 1.0) / 2.0;
    let mean_r = (n - 1.0) / 2.0;
    for model in models {
        let w = grad(model, "w");
        let b = grad(model, "b");
        let expect_w = [m, 2.0 * m, 0.0, -m];
        let expect_b = [10.0 * m, 1.0, mean_r];
        for (got, want) in w.iter().zip(expect_w).chain(b.iter().zip(expect_b)) {
            assert!(
                (got - want).abs() <= 1e-5 * want.abs().max(1.0),
                "got {got}, want {want}"
            );
        }
        assert!(model.get("frozen").unwrap().grad.is_none());
    }
    // Bit-identical on every rank
    for model in &models[1..] {
        assert_eq!(grad(model, "w"), grad(&models[0], "w"));
        assert_eq!(grad(model, "b"), grad(&models[0], "b"));
    }
}

#[test]
fn test_gradients_averaged_by_every_multi_node_strategy() {
    for kind in [StrategyKind::Naive, StrategyKind::Flat, StrategyKind::Hierarchical] {
        let models = run_strategy(&HOSTS, kind, CommunicatorConfig::default(), false);
        assert_averaged(&models);
    }
}

#[test]
fn test_hierarchical_uneven_nodes() {
    static HOSTS_UNEVEN: [&str; 6] = ["A", "B", "A", "C", "A", "B"];
    let models = run_strategy(
        &HOSTS_UNEVEN,
        StrategyKind::Hierarchical,
        CommunicatorConfig::default(),
        false,
    );
    assert_averaged(&models);
}

#[test]
fn test_hierarchical_with_device_collectives() {
    let config = CommunicatorConfig::default().with_device_collectives(true);
    let models = run_strategy(&HOSTS, StrategyKind::Hierarchical, config, true);
    assert_averaged(&models);
}

#[test]
fn test_single_node_strategy_on_one_host() {
    static ONE_HOST: [&str; 3] = ["A", "A", "A"];
    let models = run_strategy(
        &ONE_HOST,
        StrategyKind::SingleNode,
        CommunicatorConfig::default(),
        false,
    );
    assert_averaged(&models);

    let config = CommunicatorConfig::default().with_device_collectives(true);
    let models = run_strategy(&ONE_HOST, StrategyKind::SingleNode, config, true);
    assert_averaged(&models);
}

#[test]
fn test_single_node_strategy_rejects_multiple_nodes() {
    let out = LocalCluster::run(&HOSTS, quick(), |g| {
        let comm = Communicator::new(g).unwrap();
        SingleNodeStrategy::new(comm).map(|_| ())
    });
    for result in out {
        assert!(matches!(result, Err(Error::InvalidArgument { arg: "comm", .. })));
    }
}

#[test]
fn test_broadcast_model_state() {
    for kind in ALL_KINDS {
        let hosts: &[&str] = if kind == StrategyKind::SingleNode {
            &["A", "A", "A", "A"]
        } else {
            &HOSTS
        };
        let hosts: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
        let models = LocalCluster::run(&hosts, quick(), move |g| {
            let rank = g.rank();
            let mut strategy = create_strategy(kind, Communicator::new(g).unwrap()).unwrap();
            let mut model = model_for(rank);
            strategy.broadcast_model_state(&mut model).unwrap();
            model
        });
        let root = model_for(0);
        for model in &models {
            for name in ["w", "b", "frozen"] {
                assert_eq!(data(model, name), data(&root, name), "{kind} / {name}");
            }
            // Gradients are untouched by a state broadcast
            assert_eq!(grad(model, "w").len(), 4);
        }
        assert_eq!(grad(&models[3], "b"), grad(&model_for(3), "b"));
    }
}

#[test]
fn test_single_process_is_a_no_op() {
    for kind in ALL_KINDS {
        let out = LocalCluster::run(&["solo"], quick(), move |g| {
            let mut strategy = create_strategy(kind, Communicator::new(g).unwrap()).unwrap();
            let mut model = model_for(7);
            strategy.all_reduce_gradients(&mut model).unwrap();
            strategy.broadcast_model_state(&mut model).unwrap();
            model
        });
        assert_eq!(out[0], model_for(7));
    }
}

#[test]
fn test_scopes_built_on_first_collective() {
    let out = LocalCluster::run(&HOSTS, quick(), |g| {
        let comm = Communicator::new(g).unwrap();
        let mut strategy = HierarchicalStrategy::new(comm);
        let before = strategy.communicator().is_initialized();
        let mut model: Vec<Parameter> = model_for(0).iter().cloned().collect();
        strategy.all_reduce_gradients(&mut model).unwrap();
        (before, strategy.communicator().is_initialized())
    });
    assert!(out.iter().all(|&(before, after)| !before && after));
}
