use proptest::prelude::*;

use neurotrace::storage::{GraphStore, StoreOptions, Transaction, TxKind, WriteTx};
use neurotrace::types::{ClientId, Mark, NodeId, NodeState, Position, TxId};
use neurotrace::Result;

#[derive(Debug, Clone)]
enum Operation {
    NewNeuron { x: i16, y: i16 },
    Grow { from: usize, dx: i8, dy: i8 },
    Connect { a: usize, b: usize },
    Split { edge: usize, sample: usize },
    DeleteEdge { edge: usize },
    DeleteNode { node: usize },
    End { node: usize, state: usize },
    Mark { node: usize, set: bool },
    Examine { edge: usize },
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        1 => (-50i16..50, -50i16..50).prop_map(|(x, y)| Operation::NewNeuron { x, y }),
        5 => (any::<usize>(), -9i8..=9, -9i8..=9).prop_map(|(from, dx, dy)| Operation::Grow { from, dx, dy }),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Operation::Connect { a, b }),
        2 => (any::<usize>(), 0usize..3).prop_map(|(edge, sample)| Operation::Split { edge, sample }),
        1 => any::<usize>().prop_map(|edge| Operation::DeleteEdge { edge }),
        1 => any::<usize>().prop_map(|node| Operation::DeleteNode { node }),
        1 => (any::<usize>(), 0usize..5).prop_map(|(node, state)| Operation::End { node, state }),
        1 => (any::<usize>(), any::<bool>()).prop_map(|(node, set)| Operation::Mark { node, set }),
        1 => any::<usize>().prop_map(|edge| Operation::Examine { edge }),
    ]
}

fn pick<T: Copy>(items: &[T], at: usize) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[at % items.len()])
    }
}

fn run(tx: &mut WriteTx<'_>, op: &Operation) -> Result<()> {
    let nodes: Vec<NodeId> = tx.store().nodes().map(|n| n.id).collect();
    let edges: Vec<_> = tx.store().edges().map(|e| e.id).collect();
    match *op {
        Operation::NewNeuron { x, y } => {
            tx.create_neuron(Position::new(x as f64, y as f64, 0.0), None)?;
        }
        Operation::Grow { from, dx, dy } => {
            if let Some(from) = pick(&nodes, from) {
                let start = tx.store().try_node(from)?.position;
                let end = start + Position::new(dx as f64, dy as f64, 1.0);
                let neuron = tx.store().try_node(from)?.neuron;
                let node = tx.create_node(neuron, end, None)?;
                let interior = vec![start.lerp(end, 1.0 / 3.0), start.lerp(end, 2.0 / 3.0)];
                tx.create_edge(from, node, interior)?;
            }
        }
        Operation::Connect { a, b } => {
            if let (Some(a), Some(b)) = (pick(&nodes, a), pick(&nodes, b)) {
                tx.create_edge(a, b, Vec::new())?;
            }
        }
        Operation::Split { edge, sample } => {
            if let Some(edge) = pick(&edges, edge) {
                tx.split_edge(edge, sample)?;
            }
        }
        Operation::DeleteEdge { edge } => {
            if let Some(edge) = pick(&edges, edge) {
                tx.delete_edge(edge)?;
            }
        }
        Operation::DeleteNode { node } => {
            if let Some(node) = pick(&nodes, node) {
                tx.delete_node(node)?;
            }
        }
        Operation::End { node, state } => {
            if let Some(node) = pick(&nodes, node) {
                tx.set_state(node, NodeState::TERMINAL[state])?;
            }
        }
        Operation::Mark { node, set } => {
            if let Some(node) = pick(&nodes, node) {
                tx.set_mark(node, if set { Mark::Mark1 } else { Mark::Mark0 })?;
            }
        }
        Operation::Examine { edge } => {
            if let Some(edge) = pick(&edges, edge) {
                tx.set_examined(edge, true)?;
            }
        }
    }
    Ok(())
}

/// Runs `op` in its own transaction. Returns the committed transaction, if any.
fn step(store: &mut GraphStore, op: &Operation) -> Option<Transaction> {
    let mut tx = store.begin(TxKind::Manual);
    match run(&mut tx, op) {
        Ok(()) => tx.commit().ok(),
        Err(_) => {
            tx.rollback().expect("rollback restores the store");
            None
        }
    }
}

fn open() -> GraphStore {
    GraphStore::new(StoreOptions::new(ClientId(1)))
}

proptest! {
    #[test]
    fn prop_every_operation_keeps_a_forest(ops in prop::collection::vec(arb_operation(), 1..60)) {
        let mut store = open();
        for op in &ops {
            let before = store.snapshot();
            if step(&mut store, op).is_none() {
                prop_assert_eq!(&store.snapshot(), &before, "failed {:?} left changes", op);
            }
            prop_assert!(store.check_integrity().is_ok(), "after {:?}: {:?}", op, store.check_integrity());
            for neuron in store.neurons() {
                prop_assert_eq!(neuron.edges.len() + 1, neuron.nodes.len());
            }
        }
    }

    #[test]
    fn prop_inverse_restores_prior_state(ops in prop::collection::vec(arb_operation(), 1..40)) {
        let mut store = open();
        let mut undo_seq = 1u64 << 40;
        for op in &ops {
            let before = store.snapshot();
            let Some(committed) = step(&mut store, op) else {
                continue;
            };
            let after = store.snapshot();
            undo_seq += 1;
            let inverse = committed.inverse(TxId::compose(ClientId(1), undo_seq), TxKind::Undo(committed.id));
            prop_assert!(store.apply(&inverse).is_ok());
            prop_assert_eq!(&store.snapshot(), &before);
            prop_assert!(store.apply(&committed).is_ok());
            prop_assert_eq!(&store.snapshot(), &after);
        }
    }

    #[test]
    fn prop_deleting_inner_node_splits_by_degree(
        parents in prop::collection::vec(any::<usize>(), 2..30),
        victim in any::<usize>(),
    ) {
        let mut store = open();
        let mut tx = store.begin(TxKind::Manual);
        let (neuron, root) = tx.create_neuron(Position::ORIGIN, None).unwrap();
        let mut nodes = vec![root];
        for (i, parent) in parents.iter().enumerate() {
            let parent = nodes[parent % nodes.len()];
            let at = Position::new(i as f64 + 1.0, (i % 7) as f64, 0.0);
            let node = tx.create_node(neuron, at, None).unwrap();
            tx.create_edge(parent, node, Vec::new()).unwrap();
            nodes.push(node);
        }
        tx.commit().unwrap();

        let inner: Vec<NodeId> = nodes.iter().copied().filter(|n| store.degree(*n) >= 2).collect();
        prop_assume!(!inner.is_empty());
        let victim = inner[victim % inner.len()];
        let degree = store.degree(victim);
        let (node_count, edge_count) = (store.node_count(), store.edge_count());

        let mut tx = store.begin(TxKind::DeleteNode);
        tx.delete_node(victim).unwrap();
        tx.commit().unwrap();

        prop_assert_eq!(store.neuron_count(), degree);
        prop_assert_eq!(store.node_count(), node_count - 1);
        prop_assert_eq!(store.edge_count(), edge_count - degree);
        prop_assert!(store.check_integrity().is_ok());
    }
}
