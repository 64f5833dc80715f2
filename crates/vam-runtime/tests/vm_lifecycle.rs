//! Pool lifecycle: connection, allocation, release and shutdown

mod common;

use common::{rig, test_config};
use proptest::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use vam_runtime::driver::sim::{synthetic_catalog, SimCard, SimEvent, SimProvider};
use vam_runtime::{FunctionType, NodeHandle, NodeState, ReconfigCatalog, VirtualMachine, VmConfig, VmError};

#[test]
fn test_connect_by_discovery() {
    let config = test_config(2, 3);
    let sims: Vec<_> = (0..2).map(|id| Arc::new(SimCard::from_config(id, &config))).collect();
    let provider = SimProvider::new(sims.iter().cloned());

    let vm = VirtualMachine::connect(&provider, ReconfigCatalog::new(), config).unwrap();
    assert_eq!(vm.total_nodes(), 6);
    assert_eq!(vm.handles()[3], NodeHandle::new(1, 0));
    for sim in &sims {
        assert_eq!(sim.open_streams(), 9, "three streams per slot");
        assert_eq!(sim.bitfile(), None);
    }
}

#[test]
fn test_connect_with_static_bitfile() {
    let config = VmConfig {
        static_bitfile: Some(PathBuf::from("/opt/bits/static_top.bit")),
        ..test_config(1, 2)
    };
    let sim = Arc::new(SimCard::from_config(0, &config));
    let provider = SimProvider::new([Arc::clone(&sim)]);

    let _vm = VirtualMachine::connect(&provider, ReconfigCatalog::new(), config).unwrap();
    assert_eq!(sim.bitfile(), Some(PathBuf::from("/opt/bits/static_top.bit")));
}

#[test]
fn test_connect_fails_when_cards_are_missing() {
    let config = test_config(2, 1);
    let provider = SimProvider::new([Arc::new(SimCard::from_config(0, &config))]);
    let err = VirtualMachine::connect(&provider, ReconfigCatalog::new(), config)
        .err()
        .expect("second card is missing");
    assert!(matches!(err, VmError::CardProvisioning { card: 1, .. }));
}

#[test]
fn test_data_streams_follow_port_layout() {
    let rig = rig(1, 2);
    let opened: Vec<u32> = rig
        .card(0)
        .events()
        .iter()
        .filter_map(|e| match e {
            SimEvent::StreamOpened { port, .. } => Some(*port),
            _ => None,
        })
        .collect();
    assert_eq!(opened, vec![11, 12, 13, 21, 22, 23]);
}

#[test]
fn test_shutdown_closes_every_stream() {
    let rig = rig(2, 2);
    let nodes = rig.vm.allocate(4).unwrap();
    rig.vm.load_function(nodes[0], FunctionType::VAdd).unwrap();

    let cards = rig.cards.clone();
    rig.vm.shutdown().unwrap();
    for card in &cards {
        assert_eq!(card.open_streams(), 0);
    }
}

#[test]
fn test_free_keeps_loaded_function() {
    let rig = rig(1, 2);
    let nodes = rig.vm.allocate(1).unwrap();
    rig.vm.load_function(nodes[0], FunctionType::VMul).unwrap();
    rig.vm.free(&nodes).unwrap();

    let snapshot = rig.vm.node(nodes[0]).unwrap();
    assert_eq!(snapshot.state, NodeState::Free);
    assert_eq!(snapshot.loaded_function, Some(FunctionType::VMul));
    assert_eq!(snapshot.topology, None);
}

#[test]
fn test_blocked_allocation_wakes_on_free() {
    let rig = rig(1, 2);
    let held = rig.vm.allocate(2).unwrap();
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        let vm = &rig.vm;
        scope.spawn(move || {
            let nodes = vm.allocate(1).unwrap();
            tx.send(nodes).unwrap();
        });

        assert!(
            rx.recv_timeout(Duration::from_millis(50)).is_err(),
            "allocation must block while the pool is exhausted"
        );
        rig.vm.free(&held[1..]).unwrap();

        let nodes = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(nodes, vec![held[1]]);
    });
}

#[test]
fn test_configured_timeout_applies_to_allocate() {
    let config = VmConfig {
        allocation_timeout_ms: Some(20),
        ..test_config(1, 1)
    };
    let rig = common::rig_with(config);
    let _held = rig.vm.allocate(1).unwrap();
    assert!(matches!(
        rig.vm.allocate(1),
        Err(VmError::AllocationTimeout { obtained: 0, .. })
    ));
}

#[test]
fn test_busy_count_never_exceeds_pool_under_contention() {
    let rig = rig(2, 2);
    let outstanding = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..50 {
            let vm = &rig.vm;
            let outstanding = &outstanding;
            let peak = &peak;
            scope.spawn(move || {
                let nodes = vm.allocate(1).unwrap();

                let now = outstanding.fetch_add(nodes.len(), Ordering::SeqCst) + nodes.len();
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(vm.busy_count() <= 4);
                thread::sleep(Duration::from_micros(200));
                outstanding.fetch_sub(nodes.len(), Ordering::SeqCst);

                vm.free(&nodes).unwrap();
            });
        }
    });

    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert_eq!(rig.vm.busy_count(), 0);
}

#[test]
fn test_report_lists_every_node() {
    let rig = rig(1, 3);
    let nodes = rig.vm.allocate(2).unwrap();
    rig.vm.load_function(nodes[1], FunctionType::VSub).unwrap();

    let report = rig.vm.report();
    assert_eq!(report.busy_count(), 2);
    assert_eq!(report.free_count(), 1);
    assert!(report.to_string().contains("fn=vsub"));
}

#[test]
fn test_catalog_is_exposed() {
    let config = test_config(1, 2);
    let sim: Arc<dyn vam_runtime::CardDriver> = Arc::new(SimCard::from_config(0, &config));
    let vm = VirtualMachine::init(vec![sim], synthetic_catalog(2, &[FunctionType::VAdd]), config).unwrap();
    assert_eq!(vm.catalog().slots_for(FunctionType::VAdd), vec![0, 1]);
    assert_eq!(vm.config().slots_per_card, 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Live handles never overlap and always stay within the pool.
    #[test]
    fn prop_allocations_never_overlap(ops in prop::collection::vec((any::<bool>(), 1usize..4), 1..40)) {
        let rig = rig(2, 3);
        let mut live: Vec<Vec<NodeHandle>> = Vec::new();

        for (allocate, count) in ops {
            let in_use: usize = live.iter().map(Vec::len).sum();
            if allocate && count <= 6 - in_use {
                let nodes = rig.vm.allocate_timeout(count, Duration::from_millis(100)).unwrap();
                prop_assert_eq!(nodes.len(), count);
                live.push(nodes);
            } else if let Some(batch) = live.pop() {
                rig.vm.free(&batch).unwrap();
            }

            let handles: Vec<NodeHandle> = live.iter().flatten().copied().collect();
            let distinct: HashSet<_> = handles.iter().copied().collect();
            prop_assert_eq!(distinct.len(), handles.len());
            prop_assert_eq!(rig.vm.busy_count(), handles.len());
            for handle in &handles {
                prop_assert_eq!(rig.vm.node(*handle).unwrap().state, NodeState::Busy);
            }
        }
    }
}
