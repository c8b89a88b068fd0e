#![cfg(test)]

use std::sync::Arc;

use super::*;
use crate::events::{ChangeEvent, EventQueue};
use crate::storage::{Annotation, CounterMetrics, StoreOptions};
use crate::types::{Mark, NodeState};

fn p(x: f64) -> Position {
    Position::new(x, 0.0, 0.0)
}

fn open() -> (GraphStore, EventQueue) {
    let events = EventQueue::new();
    let store = GraphStore::new(StoreOptions::new(ClientId(1)).sink(Arc::new(events.clone())));
    (store, events)
}

/// Builds one neuron whose nodes form a chain along x, rooted at the first.
fn chain(store: &mut GraphStore, xs: &[f64]) -> (NeuronId, Vec<NodeId>) {
    let mut tx = store.begin(TxKind::Manual);
    let (neuron, root) = tx.create_neuron(p(xs[0]), None).unwrap();
    let mut nodes = vec![root];
    for &x in &xs[1..] {
        let node = tx.create_node(neuron, p(x), None).unwrap();
        tx.create_edge(*nodes.last().unwrap(), node, vec![]).unwrap();
        nodes.push(node);
    }
    tx.commit().unwrap();
    (neuron, nodes)
}

#[test]
fn commit_publishes_entity_events_before_committed() {
    let (mut store, events) = open();
    let mut tx = store.begin(TxKind::CreateNeuron);
    let (neuron, root) = tx.create_neuron(p(0.0), Some(2.5)).unwrap();
    assert_eq!(tx.store().try_node(root).unwrap().radius, 2.5);
    let committed = tx.commit().unwrap();
    assert_eq!(committed.deltas.len(), 2);
    let seen = events.drain();
    assert_eq!(seen[0], ChangeEvent::NeuronAdded(neuron));
    assert_eq!(seen[1], ChangeEvent::NodeAdded(root));
    assert!(matches!(seen[2], ChangeEvent::Committed { kind: TxKind::CreateNeuron, .. }));
    assert_eq!(store.try_neuron(neuron).unwrap().root, root);
    store.check_integrity().unwrap();
}

#[test]
fn rejected_commit_leaves_graph_and_events_untouched() {
    let (mut store, events) = open();
    chain(&mut store, &[0.0, 1.0]);
    events.drain();
    let before = store.snapshot();

    let neuron = store.neurons().next().unwrap().id;
    let mut tx = store.begin(TxKind::Manual);
    tx.create_node(neuron, p(5.0), None).unwrap();
    let err = tx.commit().unwrap_err();
    assert!(matches!(err, TraceError::Disconnected { reachable: 2, total: 3, .. }));
    assert!(err.is_validation());
    assert_eq!(store.snapshot(), before);
    assert!(events.is_empty());
    store.check_integrity().unwrap();
}

#[test]
fn dropped_transaction_reverts() {
    let (mut store, _events) = open();
    let before = store.snapshot();
    {
        let mut tx = store.begin(TxKind::Manual);
        tx.create_neuron(p(0.0), None).unwrap();
        assert_eq!(tx.store().node_count(), 1);
    }
    assert_eq!(store.snapshot(), before);
    assert_eq!(store.spatial().node_count(), 0);
}

#[test]
fn edge_creation_rejects_cycles_self_loops_and_cross_neuron() {
    let (mut store, _events) = open();
    let (_, a) = chain(&mut store, &[0.0, 1.0, 2.0]);
    let (_, b) = chain(&mut store, &[10.0, 11.0]);

    let mut tx = store.begin(TxKind::Manual);
    assert!(matches!(
        tx.create_edge(a[0], a[2], vec![]),
        Err(TraceError::CycleViolation { .. })
    ));
    assert!(matches!(
        tx.create_edge(a[1], a[1], vec![]),
        Err(TraceError::SelfLoop(_))
    ));
    assert!(matches!(
        tx.create_edge(a[2], b[0], vec![]),
        Err(TraceError::CrossNeuronEdge { .. })
    ));
    assert!(tx.deltas().is_empty());
    tx.rollback().unwrap();
    store.check_integrity().unwrap();
}

#[test]
fn leaf_only_states_follow_degree() {
    let (mut store, _events) = open();
    let (_, n) = chain(&mut store, &[0.0, 1.0, 2.0]);

    let mut tx = store.begin(TxKind::Annotate);
    assert!(matches!(
        tx.set_state(n[1], NodeState::End),
        Err(TraceError::InvalidStateForDegree { degree: 2, .. })
    ));
    tx.set_state(n[1], NodeState::Tangle).unwrap();
    tx.set_state(n[2], NodeState::BadEnd).unwrap();
    tx.commit().unwrap();

    let neuron = store.try_node(n[2]).unwrap().neuron;
    let mut tx = store.begin(TxKind::Extend);
    let tip = tx.create_node(neuron, p(3.0), None).unwrap();
    assert!(matches!(
        tx.create_edge(n[2], tip, vec![]),
        Err(TraceError::InvalidStateForDegree { degree: 2, .. })
    ));
}

#[test]
fn placing_mark_moves_it_within_neuron() {
    let (mut store, _events) = open();
    let (_, n) = chain(&mut store, &[0.0, 1.0, 2.0]);

    let mut tx = store.begin(TxKind::Mark);
    tx.set_mark(n[0], Mark::Mark1).unwrap();
    tx.commit().unwrap();
    let mut tx = store.begin(TxKind::Mark);
    tx.set_mark(n[2], Mark::Mark1).unwrap();
    let committed = tx.commit().unwrap();
    assert_eq!(committed.deltas.len(), 2);
    assert_eq!(store.try_node(n[0]).unwrap().mark, Mark::None);
    assert_eq!(store.try_node(n[2]).unwrap().mark, Mark::Mark1);

    let mut tx = store.begin(TxKind::Mark);
    tx.set_mark(n[2], Mark::Mark0).unwrap();
    tx.commit().unwrap();
    assert_eq!(store.try_node(n[2]).unwrap().mark, Mark::None);
}

#[test]
fn replayed_duplicate_mark_is_rejected() {
    let (mut store, _events) = open();
    let (_, n) = chain(&mut store, &[0.0, 1.0]);
    let before = store.snapshot();
    let marked = Annotation {
        state: NodeState::Normal,
        mark: Mark::Mark1,
    };
    let tx = Transaction {
        id: TxId::compose(ClientId(2), 1),
        kind: TxKind::Mark,
        deltas: vec![
            Delta::Annotate {
                node: n[0],
                before: Annotation::default(),
                after: marked,
            },
            Delta::Annotate {
                node: n[1],
                before: Annotation::default(),
                after: marked,
            },
        ],
    };
    assert!(matches!(
        store.apply(&tx),
        Err(TraceError::DuplicateMark { .. })
    ));
    assert_eq!(store.snapshot(), before);
}

#[test]
fn replay_detects_stale_records() {
    let (mut store, _events) = open();
    let (_, n) = chain(&mut store, &[0.0, 1.0]);
    let mut record = store.try_node(n[1]).unwrap().clone();
    record.radius = 9.0;
    let tx = Transaction {
        id: TxId::compose(ClientId(2), 1),
        kind: TxKind::DeleteNode,
        deltas: vec![Delta::RemoveNode(record)],
    };
    assert!(matches!(
        store.apply(&tx),
        Err(TraceError::StaleDelta { .. })
    ));
}

#[test]
fn rejected_mark_clear_replay_leaves_store_unchanged() {
    let (mut store, _events) = open();
    let (_, n) = chain(&mut store, &[0.0, 1.0]);
    let mut tx = store.begin(TxKind::Mark);
    tx.set_mark(n[0], Mark::Mark1).unwrap();
    tx.commit().unwrap();
    let before = store.snapshot();

    let marked = store.try_node(n[0]).unwrap().annotation();
    let clear = Delta::Annotate {
        node: n[0],
        before: marked,
        after: Annotation {
            mark: Mark::Mark0,
            ..marked
        },
    };
    let tx = Transaction {
        id: TxId::compose(ClientId(2), 1),
        kind: TxKind::Mark,
        deltas: vec![
            clear.clone(),
            Delta::SetExamined {
                edge: EdgeId::compose(ClientId(2), 9),
                before: false,
                after: true,
            },
        ],
    };
    assert!(matches!(
        store.apply(&tx),
        Err(TraceError::UnknownId {
            kind: EntityKind::Edge,
            ..
        })
    ));
    assert_eq!(store.snapshot(), before);
    assert_eq!(store.try_node(n[0]).unwrap().mark, Mark::Mark1);

    // A clear that lands is undone by its own inverse.
    let tx = Transaction {
        id: TxId::compose(ClientId(2), 2),
        kind: TxKind::Mark,
        deltas: vec![clear],
    };
    store.apply(&tx).unwrap();
    assert_eq!(store.try_node(n[0]).unwrap().mark, Mark::None);
    store
        .apply(&tx.inverse(TxId::compose(ClientId(2), 3), TxKind::Undo(tx.id)))
        .unwrap();
    assert_eq!(store.snapshot(), before);
}

#[test]
fn deleting_leaf_edge_removes_orphan() {
    let (mut store, _events) = open();
    let (neuron, n) = chain(&mut store, &[0.0, 10.0]);
    let edge = store.edge_between(n[0], n[1]).unwrap();
    let mut tx = store.begin(TxKind::DeleteEdges);
    tx.delete_edge(edge).unwrap();
    tx.commit().unwrap();
    assert!(store.node(n[1]).is_none());
    assert_eq!(store.try_neuron(neuron).unwrap().nodes.len(), 1);
    assert_eq!(store.neuron_count(), 1);
    store.check_integrity().unwrap();
}

#[test]
fn deleting_inner_edge_splits_off_new_neuron() {
    let (mut store, _events) = open();
    let (neuron, n) = chain(&mut store, &[0.0, 1.0, 2.0, 3.0]);
    let edge = store.edge_between(n[1], n[2]).unwrap();
    let mut tx = store.begin(TxKind::DeleteEdges);
    tx.delete_edge(edge).unwrap();
    tx.commit().unwrap();

    assert_eq!(store.neuron_count(), 2);
    assert_eq!(store.try_node(n[1]).unwrap().neuron, neuron);
    let split = store.try_node(n[3]).unwrap().neuron;
    assert_ne!(split, neuron);
    assert_eq!(store.try_neuron(split).unwrap().root, n[2]);
    assert_eq!(store.try_neuron(split).unwrap().edges.len(), 1);
    store.check_integrity().unwrap();
}

#[test]
fn split_part_is_rooted_at_its_mark() {
    let (mut store, _events) = open();
    let (_, n) = chain(&mut store, &[0.0, 1.0, 2.0, 3.0]);
    let mut tx = store.begin(TxKind::Mark);
    tx.set_mark(n[3], Mark::Mark1).unwrap();
    tx.commit().unwrap();

    let edge = store.edge_between(n[1], n[2]).unwrap();
    let mut tx = store.begin(TxKind::DeleteEdges);
    tx.delete_edge(edge).unwrap();
    tx.commit().unwrap();
    let split = store.try_node(n[2]).unwrap().neuron;
    assert_eq!(store.try_neuron(split).unwrap().root, n[3]);
}

#[test]
fn deleting_node_keeps_every_part() {
    let (mut store, _events) = open();
    let (neuron, n) = chain(&mut store, &[0.0, 1.0, 2.0]);
    let metrics = Arc::new(CounterMetrics::default());
    store.metrics = metrics.clone() as Arc<dyn GraphMetrics>;
    let mut tx = store.begin(TxKind::DeleteNode);
    tx.delete_node(n[1]).unwrap();
    tx.commit().unwrap();
    assert_eq!(store.node_count(), 2);
    assert_eq!(store.neuron_count(), 2);
    assert_eq!(store.try_node(n[0]).unwrap().neuron, neuron);
    assert_ne!(store.try_node(n[2]).unwrap().neuron, neuron);
    assert_eq!(
        metrics.neuron_splits.load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    assert_eq!(
        metrics.edges_deleted.load(std::sync::atomic::Ordering::Relaxed),
        2
    );
    store.check_integrity().unwrap();
}

#[test]
fn deleting_root_reroots_at_lowest_neighbour() {
    let (mut store, _events) = open();
    let (neuron, n) = chain(&mut store, &[0.0, 1.0, 2.0]);
    let mut tx = store.begin(TxKind::DeleteNode);
    tx.delete_node(n[0]).unwrap();
    tx.commit().unwrap();
    assert_eq!(store.try_neuron(neuron).unwrap().root, n[1]);
    assert_eq!(store.neuron_count(), 1);
}

#[test]
fn deleting_last_node_removes_neuron() {
    let (mut store, events) = open();
    let (neuron, n) = chain(&mut store, &[0.0]);
    events.drain();
    let mut tx = store.begin(TxKind::DeleteNode);
    tx.delete_node(n[0]).unwrap();
    tx.commit().unwrap();
    assert!(store.neuron(neuron).is_none());
    assert!(events.drain().contains(&ChangeEvent::NeuronRemoved(neuron)));
}

#[test]
fn split_edge_divides_samples_and_keeps_examined() {
    let (mut store, _events) = open();
    let mut tx = store.begin(TxKind::Manual);
    let (neuron, a) = tx.create_neuron(p(0.0), None).unwrap();
    let b = tx.create_node(neuron, p(4.0), None).unwrap();
    let edge = tx
        .create_edge(a, b, vec![p(1.0), p(2.0), p(3.0)])
        .unwrap();
    tx.set_examined(edge, true).unwrap();
    tx.commit().unwrap();

    let mut tx = store.begin(TxKind::Branch);
    let middle = tx.split_edge(edge, 1).unwrap();
    assert!(matches!(
        tx.split_edge(EdgeId::compose(ClientId(1), 99), 0),
        Err(TraceError::UnknownId { .. })
    ));
    tx.commit().unwrap();

    assert!(store.edge(edge).is_none());
    assert_eq!(store.try_node(middle).unwrap().position, p(2.0));
    let left = store.try_edge(store.edge_between(a, middle).unwrap()).unwrap();
    let right = store.try_edge(store.edge_between(middle, b).unwrap()).unwrap();
    assert_eq!(left.points, vec![p(1.0)]);
    assert_eq!(right.points, vec![p(3.0)]);
    assert!(left.examined && right.examined);
    store.check_integrity().unwrap();
}

#[test]
fn applying_inverse_restores_snapshot() {
    let (mut store, _events) = open();
    let (_, n) = chain(&mut store, &[0.0, 1.0, 2.0, 3.0]);
    let before = store.snapshot();
    let mut tx = store.begin(TxKind::DeleteNode);
    tx.delete_node(n[2]).unwrap();
    let committed = tx.commit().unwrap();
    assert_ne!(store.snapshot(), before);

    let undo_id = store.allocate_tx_id();
    store
        .apply(&committed.inverse(undo_id, TxKind::Undo(committed.id)))
        .unwrap();
    assert_eq!(store.snapshot(), before);
    store.check_integrity().unwrap();
}

#[test]
fn tree_path_walks_from_a_to_b() {
    let (mut store, _events) = open();
    let (_, n) = chain(&mut store, &[0.0, 1.0, 2.0, 3.0]);
    let path = store.tree_path(n[3], n[1]).unwrap();
    assert_eq!(
        path,
        vec![
            store.edge_between(n[3], n[2]).unwrap(),
            store.edge_between(n[2], n[1]).unwrap(),
        ]
    );
    assert_eq!(store.tree_path(n[1], n[1]), Some(vec![]));
    let (_, other) = chain(&mut store, &[9.0]);
    assert!(store.tree_path(n[0], other[0]).is_none());
}

#[test]
fn spatial_index_tracks_edits() {
    let (mut store, _events) = open();
    let (_, n) = chain(&mut store, &[0.0, 10.0]);
    let hit = store
        .spatial()
        .nearest_edge(Position::new(5.0, 0.5, 0.0), 1.0)
        .unwrap();
    assert_eq!(Some(hit.edge), store.edge_between(n[0], n[1]));
    let mut tx = store.begin(TxKind::DeleteNode);
    tx.delete_node(n[1]).unwrap();
    tx.commit().unwrap();
    assert!(store
        .spatial()
        .nearest_edge(Position::new(5.0, 0.5, 0.0), 1.0)
        .is_none());
    assert!(store.spatial().nearest_node(p(10.0), 0.5).is_none());
}
