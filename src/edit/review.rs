//! Proofreading cursor over unresolved nodes.

use std::collections::BTreeMap;

use crate::spatial::GridKey;
use crate::storage::{GraphStore, Node};
use crate::types::{NodeId, NodeState};

/// A node still needs review when any incident edge is unexamined, or when it
/// is a non-root tip nobody has annotated.
pub(crate) fn is_unresolved(store: &GraphStore, node: &Node) -> bool {
    let edges = store.incident_edges(node.id);
    if edges
        .iter()
        .any(|e| store.edge(*e).is_some_and(|edge| !edge.examined))
    {
        return true;
    }
    let is_root = store
        .neuron(node.neuron)
        .is_some_and(|neuron| neuron.root == node.id);
    edges.len() <= 1 && !is_root && node.state == NodeState::Normal
}

/// First unresolved node with an id above `after`, wrapping to the lowest.
pub(crate) fn next_node(store: &GraphStore, after: Option<NodeId>) -> Option<NodeId> {
    let unresolved = || store.nodes().filter(|n| is_unresolved(store, n)).map(|n| n.id);
    after
        .and_then(|a| unresolved().find(|id| *id > a))
        .or_else(|| unresolved().next())
}

/// First cube above `after` holding an unresolved node, wrapping to the
/// lowest. Returns the cube and its lowest unresolved node.
pub(crate) fn next_cube(
    store: &GraphStore,
    cube_size: f64,
    after: Option<GridKey>,
) -> Option<(GridKey, NodeId)> {
    let mut cubes: BTreeMap<GridKey, NodeId> = BTreeMap::new();
    for node in store.nodes().filter(|n| is_unresolved(store, n)) {
        cubes
            .entry(GridKey::from_pos(node.position, cube_size))
            .or_insert(node.id);
    }
    let after_key = after.and_then(|a| {
        cubes
            .range((std::ops::Bound::Excluded(a), std::ops::Bound::Unbounded))
            .next()
    });
    after_key
        .or_else(|| cubes.iter().next())
        .map(|(k, n)| (*k, *n))
}
