//! Batch execution against simulated cards

mod common;

use common::rig;
use vam_runtime::driver::sim::SimEvent;
use vam_runtime::{
    ControlFrame, DriverError, FrameKind, FunctionType, IoBinding, IoBuffer, NodeHandle, Port, Topology, TransferOp, VmError,
};

#[test]
fn test_vector_add_end_to_end() {
    let rig = rig(1, 2);
    let nodes = rig.vm.allocate(1).unwrap();
    let node = nodes[0];
    assert_eq!(node, NodeHandle::new(0, 0));
    rig.vm.load_function(node, FunctionType::VAdd).unwrap();

    let out = IoBuffer::zeroed(4);
    rig.vm
        .bind_io(
            node,
            Some(vec![1, 2, 3, 4].into()),
            Some(vec![5, 6, 7, 8].into()),
            out.clone(),
            4,
        )
        .unwrap();
    rig.card(0).take_events();

    rig.vm.start(&nodes, 4, 4, 4).unwrap();
    assert_eq!(out.to_vec(), vec![6, 8, 10, 12]);

    let events = rig.card(0).events();
    assert!(events.contains(&SimEvent::Write { port: 11, bytes: 16 }));
    assert!(events.contains(&SimEvent::Write { port: 12, bytes: 16 }));
    assert!(events.contains(&SimEvent::Read { port: 13, bytes: 16 }));
    assert_eq!(rig.card(0).last_input(0, Port::InputA), Some(vec![1, 2, 3, 4]));
    assert_eq!(rig.card(0).last_input(0, Port::InputB), Some(vec![5, 6, 7, 8]));
    assert_eq!(rig.card(0).pending_responses(), 0, "acknowledgement consumed");

    rig.vm.free(&nodes).unwrap();
}

#[test]
fn test_go_frames_precede_all_data() {
    let rig = rig(2, 2);
    let nodes = rig.vm.allocate(3).unwrap();
    let mut outputs = Vec::new();
    for (i, &node) in nodes.iter().enumerate() {
        rig.vm.load_function(node, FunctionType::VSub).unwrap();
        let base = i as i32 * 10;
        let out = IoBuffer::zeroed(3);
        rig.vm
            .bind_io(
                node,
                Some(vec![base + 9, base + 9, base + 9].into()),
                Some(vec![1, 2, 3].into()),
                out.clone(),
                3,
            )
            .unwrap();
        outputs.push(out);
    }
    for card in &rig.cards {
        card.take_events();
    }

    rig.vm.start(&nodes, 3, 3, 3).unwrap();

    for (i, out) in outputs.iter().enumerate() {
        let base = i as i32 * 10;
        assert_eq!(out.to_vec(), vec![base + 8, base + 7, base + 6]);
    }

    let go_frames: usize = rig
        .cards
        .iter()
        .map(|card| {
            card.control_frames()
                .iter()
                .filter(|f| f.kind() == Some(FrameKind::Go))
                .count()
        })
        .sum();
    assert_eq!(go_frames, nodes.len(), "one go frame per node");

    for card in &rig.cards {
        let events = card.events();
        let last_go = events
            .iter()
            .rposition(|e| matches!(e, SimEvent::Control(f) if f.kind() == Some(FrameKind::Go)))
            .expect("go frame sent");
        let first_data = events
            .iter()
            .position(|e| match e {
                SimEvent::Write { .. } => true,
                SimEvent::Read { port, .. } => *port != 50,
                _ => false,
            })
            .expect("data moved");
        assert!(last_go < first_data, "go frames must reach the card before any data");
    }

    // the batch acknowledgement comes from the last node's card; the other
    // card keeps one unread completion until its next go frame
    assert_eq!(rig.card(1).pending_responses(), 0);
    assert_eq!(rig.card(0).pending_responses(), 1);

    rig.vm.start(&nodes, 3, 3, 3).unwrap();
    assert_eq!(rig.card(0).pending_responses(), 1);
    assert_eq!(rig.card(1).pending_responses(), 0);
}

#[test]
fn test_completions_do_not_accumulate_across_batches() {
    let rig = rig(1, 3);
    let nodes = rig.vm.allocate(3).unwrap();
    for &node in &nodes {
        rig.vm.load_function(node, FunctionType::VMul).unwrap();
        rig.vm
            .bind_io(node, Some(vec![2, 3].into()), Some(vec![4, 5].into()), IoBuffer::zeroed(2), 2)
            .unwrap();
    }

    for _ in 0..4 {
        rig.vm.start(&nodes, 2, 2, 2).unwrap();
        assert_eq!(rig.card(0).pending_responses(), 0);
    }
    rig.vm.end(&nodes, 2).unwrap();
    assert_eq!(rig.card(0).pending_responses(), 0);
    assert_eq!(rig.card(0).completed_runs(2), 5);
}

#[test]
fn test_pending_command_tracks_last_frame() {
    let rig = rig(1, 1);
    let nodes = rig.vm.allocate(1).unwrap();
    rig.vm.load_function(nodes[0], FunctionType::VMul).unwrap();
    rig.vm
        .bind_io(nodes[0], Some(vec![2].into()), Some(vec![3].into()), IoBuffer::zeroed(1), 1)
        .unwrap();
    assert_eq!(
        rig.vm.node(nodes[0]).unwrap().pending_command,
        ControlFrame::tie_io(0, 1).words()[3]
    );

    rig.vm.start(&nodes, 1, 1, 1).unwrap();
    assert_eq!(
        rig.vm.node(nodes[0]).unwrap().pending_command,
        ControlFrame::go(0).words()[0]
    );
}

#[test]
fn test_repeated_batches_use_fresh_inputs() {
    let rig = rig(1, 1);
    let nodes = rig.vm.allocate(1).unwrap();
    rig.vm.load_function(nodes[0], FunctionType::VAdd).unwrap();

    let a = IoBuffer::from(vec![1, 1]);
    let b = IoBuffer::from(vec![2, 2]);
    let out = IoBuffer::zeroed(2);
    rig.vm
        .bind_io(nodes[0], Some(a.clone()), Some(b.clone()), out.clone(), 2)
        .unwrap();

    for round in 0..5 {
        a.replace(vec![round, round * 2]);
        rig.vm.start(&nodes, 2, 2, 2).unwrap();
        assert_eq!(out.to_vec(), vec![round + 2, round * 2 + 2]);
    }
    assert_eq!(rig.card(0).completed_runs(0), 5);
    assert_eq!(rig.card(0).runs_started(0), 5);
}

#[test]
fn test_end_drains_without_new_run() {
    let rig = rig(1, 2);
    let nodes = rig.vm.allocate(2).unwrap();
    let mut outputs = Vec::new();
    for &node in &nodes {
        rig.vm.load_function(node, FunctionType::VAddReduce).unwrap();
        let out = IoBuffer::zeroed(1);
        rig.vm
            .bind_io(node, Some(vec![1, 2].into()), Some(vec![3, 4].into()), out.clone(), 2)
            .unwrap();
        outputs.push(out);
    }

    rig.vm.start(&nodes, 2, 2, 1).unwrap();
    for out in &outputs {
        out.replace(vec![0]);
    }
    let go_frames = |rig: &common::Rig| {
        rig.card(0)
            .control_frames()
            .iter()
            .filter(|f| f.kind() == Some(FrameKind::Go))
            .count()
    };
    let before = go_frames(&rig);

    rig.vm.end(&nodes, 1).unwrap();
    for out in &outputs {
        assert_eq!(out.to_vec(), vec![10]);
    }
    assert_eq!(go_frames(&rig), before, "end never sends go frames");
}

#[test]
fn test_input_fault_surfaces_as_hardware_error() {
    let rig = rig(1, 2);
    let nodes = rig.vm.allocate(2).unwrap();
    for &node in &nodes {
        rig.vm.load_function(node, FunctionType::VAdd).unwrap();
        rig.vm
            .bind_io(node, Some(IoBuffer::zeroed(2)), Some(IoBuffer::zeroed(2)), IoBuffer::zeroed(2), 2)
            .unwrap();
    }

    // input-A of slot 1
    rig.card(0).inject_fault(21, DriverError::IO);
    let err = rig.vm.start(&nodes, 2, 2, 2).unwrap_err();
    match err {
        VmError::HardwareIo { node, op, source } => {
            assert_eq!(node, nodes[1]);
            assert_eq!(op, TransferOp::WriteInput1);
            assert_eq!(source.code, DriverError::IO);
        }
        other => panic!("unexpected error: {other}"),
    }

    let acknowledgement_reads = rig
        .card(0)
        .events()
        .iter()
        .filter(|e| matches!(e, SimEvent::Read { port: 50, .. }))
        .count();
    assert_eq!(acknowledgement_reads, 0, "no acknowledgement after a failed batch");

    // the pool recovers once the fault clears
    rig.card(0).clear_faults();
    rig.vm.start(&nodes, 2, 2, 2).unwrap();
}

#[test]
fn test_unbound_and_unsupported_nodes_are_rejected() {
    let rig = rig(1, 2);
    let nodes = rig.vm.allocate(2).unwrap();

    assert!(matches!(
        rig.vm.start(&nodes[..1], 1, 1, 1),
        Err(VmError::TopologyUnset(n)) if n == nodes[0]
    ));
    assert!(matches!(rig.vm.end(&nodes[..1], 1), Err(VmError::TopologyUnset(_))));

    for topology in Topology::ALL.into_iter().filter(|t| !t.is_supported()) {
        let binding = IoBinding::buffers(None, None, IoBuffer::zeroed(1), 1).with_topology(topology);
        assert!(matches!(
            rig.vm.bind(nodes[1], binding),
            Err(VmError::UnsupportedTopology { topology: t, .. }) if t == topology
        ));
    }

    rig.vm.free(&nodes).unwrap();
    assert!(matches!(
        rig.vm.start(&nodes[..1], 1, 1, 1),
        Err(VmError::NodeNotAllocated(_))
    ));
}

#[test]
fn test_short_output_buffer_is_rejected_before_go() {
    let rig = rig(1, 1);
    let nodes = rig.vm.allocate(1).unwrap();
    rig.vm.load_function(nodes[0], FunctionType::VAdd).unwrap();
    rig.vm
        .bind_io(nodes[0], Some(IoBuffer::zeroed(8)), Some(IoBuffer::zeroed(8)), IoBuffer::zeroed(2), 8)
        .unwrap();

    let err = rig.vm.start(&nodes, 8, 8, 8).unwrap_err();
    assert!(matches!(
        err,
        VmError::BufferTooSmall {
            port: Port::Output,
            requested: 8,
            available: 2,
            ..
        }
    ));
    assert_eq!(rig.card(0).runs_started(0), 0);
}

#[test]
fn test_acknowledgement_frame_is_consumed() {
    let rig = rig(1, 1);
    let nodes = rig.vm.allocate(1).unwrap();
    rig.vm.load_function(nodes[0], FunctionType::VReduce).unwrap();
    rig.vm
        .bind_io(nodes[0], Some(vec![4, 5, 6].into()), None, IoBuffer::zeroed(1), 3)
        .unwrap();
    rig.vm.start(&nodes, 3, 0, 1).unwrap();

    let reads: Vec<_> = rig
        .card(0)
        .events()
        .into_iter()
        .filter(|e| matches!(e, SimEvent::Read { port: 50, .. }))
        .collect();
    assert_eq!(reads.len(), 1);
    assert_eq!(rig.card(0).pending_responses(), 0);
}
