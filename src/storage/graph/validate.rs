use std::collections::{BTreeSet, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Result, TraceError};
use crate::types::{Mark, NeuronId, NodeId};

use super::GraphStore;

/// Checks the tree invariants of every listed neuron that still exists.
pub(super) fn validate_neurons(store: &GraphStore, neurons: &BTreeSet<NeuronId>) -> Result<()> {
    for &id in neurons {
        validate_neuron(store, id)?;
    }
    Ok(())
}

fn validate_neuron(store: &GraphStore, id: NeuronId) -> Result<()> {
    let Some(neuron) = store.neuron(id) else {
        return Ok(());
    };
    let total = neuron.nodes.len();
    if total == 0 {
        return Err(TraceError::EmptyNeuron(id));
    }
    if !neuron.nodes.contains(&neuron.root) {
        return Err(TraceError::Disconnected {
            neuron: id,
            reachable: 0,
            total,
        });
    }

    let mut forest = UnionFind::default();
    for &edge_id in &neuron.edges {
        let edge = store
            .edge(edge_id)
            .ok_or_else(|| TraceError::corruption(format!("neuron {id} lists missing edge {edge_id}")))?;
        let [a, b] = edge.nodes;
        let owner_a = store.try_node(a)?.neuron;
        let owner_b = store.try_node(b)?.neuron;
        if owner_a != id || owner_b != id {
            return Err(TraceError::CrossNeuronEdge {
                a,
                neuron_a: owner_a,
                b,
                neuron_b: owner_b,
            });
        }
        if !forest.union(a, b) {
            return Err(TraceError::CycleViolation { neuron: id, a, b });
        }
    }

    let mut reached: FxHashSet<NodeId> = FxHashSet::default();
    let mut queue = VecDeque::from([neuron.root]);
    reached.insert(neuron.root);
    while let Some(cur) = queue.pop_front() {
        for edge_id in store.incident_edges(cur) {
            if !neuron.edges.contains(edge_id) {
                continue;
            }
            let next = store.edge(*edge_id).and_then(|edge| edge.other(cur));
            if let Some(next) = next {
                if reached.insert(next) {
                    queue.push_back(next);
                }
            }
        }
    }
    if reached.len() < total {
        return Err(TraceError::Disconnected {
            neuron: id,
            reachable: reached.len(),
            total,
        });
    }

    let mut marked: Option<NodeId> = None;
    for &node_id in &neuron.nodes {
        let node = store.try_node(node_id)?;
        let degree = store.degree(node_id);
        if node.state.requires_leaf() && degree > 1 {
            return Err(TraceError::InvalidStateForDegree {
                node: node_id,
                state: node.state,
                degree,
            });
        }
        if node.mark.is_set() {
            if let Some(first) = marked {
                return Err(TraceError::DuplicateMark {
                    neuron: id,
                    mark: Mark::Mark1,
                    first,
                    second: node_id,
                });
            }
            marked = Some(node_id);
        }
    }
    Ok(())
}

#[derive(Default)]
struct UnionFind {
    parent: FxHashMap<NodeId, NodeId>,
}

impl UnionFind {
    fn find(&mut self, node: NodeId) -> NodeId {
        let mut root = node;
        while let Some(&up) = self.parent.get(&root) {
            if up == root {
                break;
            }
            root = up;
        }
        let mut cur = node;
        while cur != root {
            let next = self.parent.get(&cur).copied().unwrap_or(root);
            self.parent.insert(cur, root);
            cur = next;
        }
        root
    }

    /// Joins the sets of `a` and `b`; false when they were already joined.
    fn union(&mut self, a: NodeId, b: NodeId) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        self.parent.insert(ra, rb);
        true
    }
}
