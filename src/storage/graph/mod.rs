//! In-memory neuron forest with invertible, validated transactions.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{Result, TraceError};
use crate::events::EventSink;
use crate::spatial::SpatialIndex;
use crate::types::{ClientId, EdgeId, EntityKind, IdAllocator, NeuronId, NodeId, Position, TxId};

use super::delta::{Delta, Transaction, TxKind};
use super::metrics::GraphMetrics;
use super::options::StoreOptions;
use super::types::{Annotation, Edge, Neuron, Node, ReviewProgress};

mod validate;
mod writer;

#[cfg(test)]
mod tests;

pub use writer::{TxState, WriteTx};

/// Plain copy of the graph contents, for comparisons.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphSnapshot {
    /// All nodes.
    pub nodes: BTreeMap<NodeId, Node>,
    /// All edges.
    pub edges: BTreeMap<EdgeId, Edge>,
    /// All neurons.
    pub neurons: BTreeMap<NeuronId, Neuron>,
}

/// The authoritative store of nodes, edges and neurons.
///
/// Reads go straight to the maps. Writes go through [`WriteTx`], which applies
/// deltas eagerly so a transaction observes its own changes, then validates the
/// touched neurons at commit and reverts on rejection.
pub struct GraphStore {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    neurons: BTreeMap<NeuronId, Neuron>,
    adjacency: FxHashMap<NodeId, SmallVec<[EdgeId; 4]>>,
    spatial: SpatialIndex,
    ids: IdAllocator,
    default_radius: f64,
    sink: Arc<dyn EventSink>,
    metrics: Arc<dyn GraphMetrics>,
}

impl GraphStore {
    /// Opens an empty store.
    pub fn new(options: StoreOptions) -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            neurons: BTreeMap::new(),
            adjacency: FxHashMap::default(),
            spatial: SpatialIndex::new(options.cell_size),
            ids: IdAllocator::new(options.client),
            default_radius: options.default_radius,
            sink: options.sink,
            metrics: options.metrics,
        }
    }

    /// Client tag of this store's allocator.
    pub fn client(&self) -> ClientId {
        self.ids.client()
    }

    /// Radius given to nodes created without an estimate.
    pub fn default_radius(&self) -> f64 {
        self.default_radius
    }

    /// Starts a local write transaction.
    pub fn begin(&mut self, kind: TxKind) -> WriteTx<'_> {
        let id = self.ids.tx();
        WriteTx::new(self, id, kind, "local")
    }

    /// Replays a recorded transaction atomically, validating it like a local one.
    pub fn apply(&mut self, tx: &Transaction) -> Result<()> {
        self.replay(tx, "replay")
    }

    /// Replays `tx`, counting it in metrics under `origin`.
    pub(crate) fn replay(&mut self, tx: &Transaction, origin: &'static str) -> Result<()> {
        self.ids.observe_tx(tx.id);
        let mut write = WriteTx::new(self, tx.id, tx.kind, origin);
        for delta in &tx.deltas {
            if let Err(err) = write.push(delta.clone()) {
                write.rollback()?;
                return Err(err);
            }
        }
        write.commit().map(|_| ())
    }

    pub(crate) fn allocate_tx_id(&mut self) -> TxId {
        self.ids.tx()
    }

    /// Looks up a node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Looks up an edge.
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// Looks up a neuron.
    pub fn neuron(&self, id: NeuronId) -> Option<&Neuron> {
        self.neurons.get(&id)
    }

    /// Looks up a node or reports `UnknownId`.
    pub fn try_node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or_else(|| TraceError::unknown_node(id))
    }

    /// Looks up an edge or reports `UnknownId`.
    pub fn try_edge(&self, id: EdgeId) -> Result<&Edge> {
        self.edges.get(&id).ok_or_else(|| TraceError::unknown_edge(id))
    }

    /// Looks up a neuron or reports `UnknownId`.
    pub fn try_neuron(&self, id: NeuronId) -> Result<&Neuron> {
        self.neurons
            .get(&id)
            .ok_or_else(|| TraceError::unknown_neuron(id))
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All edges in id order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// All neurons in id order.
    pub fn neurons(&self) -> impl Iterator<Item = &Neuron> {
        self.neurons.values()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of neurons.
    pub fn neuron_count(&self) -> usize {
        self.neurons.len()
    }

    /// Edges incident to `node`, in id order.
    pub fn incident_edges(&self, node: NodeId) -> &[EdgeId] {
        self.adjacency
            .get(&node)
            .map(|edges| edges.as_slice())
            .unwrap_or(&[])
    }

    /// Number of incident edges.
    pub fn degree(&self, node: NodeId) -> usize {
        self.incident_edges(node).len()
    }

    /// Nodes sharing an edge with `node`.
    pub fn neighbors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.incident_edges(node)
            .iter()
            .filter_map(move |e| self.edges.get(e).and_then(|edge| edge.other(node)))
    }

    /// The edge joining `a` and `b`, if any.
    pub fn edge_between(&self, a: NodeId, b: NodeId) -> Option<EdgeId> {
        self.incident_edges(a)
            .iter()
            .copied()
            .find(|e| self.edges.get(e).is_some_and(|edge| edge.other(a) == Some(b)))
    }

    /// Full polyline of an edge: first endpoint, interior samples, second endpoint.
    pub fn polyline(&self, edge: EdgeId) -> Result<Vec<Position>> {
        let edge = self.try_edge(edge)?;
        self.polyline_of(edge)
    }

    fn polyline_of(&self, edge: &Edge) -> Result<Vec<Position>> {
        let a = self.try_node(edge.nodes[0])?.position;
        let b = self.try_node(edge.nodes[1])?.position;
        let mut line = Vec::with_capacity(edge.points.len() + 2);
        line.push(a);
        line.extend(edge.points.iter().copied());
        line.push(b);
        Ok(line)
    }

    /// Whether `b` can be reached from `a` along edges.
    pub fn connected(&self, a: NodeId, b: NodeId) -> bool {
        self.tree_path(a, b).is_some()
    }

    /// Edges on the unique path from `a` to `b`, in walking order.
    ///
    /// Returns `Some(vec![])` when `a == b` and `None` when they are not connected.
    pub fn tree_path(&self, a: NodeId, b: NodeId) -> Option<Vec<EdgeId>> {
        if !self.nodes.contains_key(&a) || !self.nodes.contains_key(&b) {
            return None;
        }
        if a == b {
            return Some(Vec::new());
        }
        let mut parent: FxHashMap<NodeId, (NodeId, EdgeId)> = FxHashMap::default();
        let mut queue = VecDeque::from([a]);
        while let Some(cur) = queue.pop_front() {
            for &e in self.incident_edges(cur) {
                let Some(next) = self.edges.get(&e).and_then(|edge| edge.other(cur)) else {
                    continue;
                };
                if next == a || parent.contains_key(&next) {
                    continue;
                }
                parent.insert(next, (cur, e));
                if next == b {
                    let mut path = Vec::new();
                    let mut at = b;
                    while let Some(&(prev, edge)) = parent.get(&at) {
                        path.push(edge);
                        at = prev;
                        if at == a {
                            break;
                        }
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Connected components of a neuron's current members, ordered by smallest node id.
    pub fn components(&self, neuron: NeuronId) -> Result<Vec<BTreeSet<NodeId>>> {
        let members = &self.try_neuron(neuron)?.nodes;
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        let mut out = Vec::new();
        for &start in members {
            if seen.contains(&start) {
                continue;
            }
            let mut comp = BTreeSet::new();
            let mut queue = VecDeque::from([start]);
            seen.insert(start);
            while let Some(cur) = queue.pop_front() {
                comp.insert(cur);
                for next in self.neighbors(cur) {
                    if members.contains(&next) && seen.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
            out.push(comp);
        }
        Ok(out)
    }

    /// Examined and total edge counts of a neuron.
    pub fn review_progress(&self, neuron: NeuronId) -> Result<ReviewProgress> {
        let neuron = self.try_neuron(neuron)?;
        let examined = neuron
            .edges
            .iter()
            .filter(|e| self.edges.get(e).is_some_and(|edge| edge.examined))
            .count();
        Ok(ReviewProgress {
            examined,
            total: neuron.edges.len(),
        })
    }

    /// Spatial index over the current graph.
    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    /// Copies the graph contents.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            neurons: self.neurons.clone(),
        }
    }

    /// Validates every neuron and the derived structures from scratch.
    pub fn check_integrity(&self) -> Result<()> {
        let all: BTreeSet<NeuronId> = self.neurons.keys().copied().collect();
        validate::validate_neurons(self, &all)?;
        for node in self.nodes.values() {
            let owner = self.try_neuron(node.neuron)?;
            if !owner.nodes.contains(&node.id) {
                return Err(TraceError::corruption(format!(
                    "node {} missing from neuron {}",
                    node.id, node.neuron
                )));
            }
        }
        let degree_sum: usize = self.adjacency.values().map(|e| e.len()).sum();
        if degree_sum != 2 * self.edges.len() {
            return Err(TraceError::corruption(format!(
                "adjacency holds {degree_sum} entries for {} edges",
                self.edges.len()
            )));
        }
        if self.spatial.node_count() != self.nodes.len()
            || self.spatial.edge_count() != self.edges.len()
        {
            return Err(TraceError::corruption("spatial index out of sync"));
        }
        Ok(())
    }

    fn neuron_mut(&mut self, id: NeuronId) -> Result<&mut Neuron> {
        self.neurons
            .get_mut(&id)
            .ok_or_else(|| TraceError::unknown_neuron(id))
    }

    /// Applies one delta after structural checks. Tree invariants are left to commit.
    fn apply_delta(&mut self, delta: &Delta) -> Result<()> {
        trace!(?delta, "apply delta");
        match delta {
            Delta::AddNeuron { id, root } => {
                if self.neurons.contains_key(id) {
                    return Err(stale(EntityKind::Neuron, *id, "already exists"));
                }
                self.ids.observe_neuron(*id);
                self.neurons.insert(*id, Neuron::new(*id, *root));
            }
            Delta::RemoveNeuron { id, root } => {
                let neuron = self.try_neuron(*id)?;
                if neuron.root != *root {
                    return Err(stale(EntityKind::Neuron, *id, "root differs"));
                }
                if !neuron.nodes.is_empty() || !neuron.edges.is_empty() {
                    return Err(stale(EntityKind::Neuron, *id, "still owns members"));
                }
                self.neurons.remove(id);
            }
            Delta::SetRoot {
                neuron,
                before,
                after,
            } => {
                let record = self.neuron_mut(*neuron)?;
                if record.root != *before {
                    return Err(stale(EntityKind::Neuron, *neuron, "root differs"));
                }
                record.root = *after;
            }
            Delta::AddNode(node) => {
                if self.nodes.contains_key(&node.id) {
                    return Err(stale(EntityKind::Node, node.id, "already exists"));
                }
                self.neuron_mut(node.neuron)?.nodes.insert(node.id);
                self.ids.observe_node(node.id);
                self.adjacency.insert(node.id, SmallVec::new());
                self.spatial.insert_node(node.id, node.position);
                self.nodes.insert(node.id, node.clone());
            }
            Delta::RemoveNode(node) => {
                let current = self.try_node(node.id)?;
                if current != node {
                    return Err(stale(EntityKind::Node, node.id, "record differs"));
                }
                if self.degree(node.id) > 0 {
                    return Err(stale(EntityKind::Node, node.id, "still has incident edges"));
                }
                if let Some(owner) = self.neurons.get_mut(&node.neuron) {
                    owner.nodes.remove(&node.id);
                }
                self.adjacency.remove(&node.id);
                self.spatial.remove_node(node.id);
                self.nodes.remove(&node.id);
            }
            Delta::AddEdge(edge) => {
                if self.edges.contains_key(&edge.id) {
                    return Err(stale(EntityKind::Edge, edge.id, "already exists"));
                }
                let [a, b] = edge.nodes;
                if a == b {
                    return Err(TraceError::SelfLoop(a));
                }
                self.try_node(a)?;
                self.try_node(b)?;
                self.neuron_mut(edge.neuron)?.edges.insert(edge.id);
                self.ids.observe_edge(edge.id);
                let line = self.polyline_of(edge)?;
                for n in [a, b] {
                    let list = self.adjacency.entry(n).or_default();
                    let at = list.partition_point(|e| *e < edge.id);
                    list.insert(at, edge.id);
                }
                self.spatial.insert_edge(edge.id, line);
                self.edges.insert(edge.id, edge.clone());
            }
            Delta::RemoveEdge(edge) => {
                let current = self.try_edge(edge.id)?;
                if current != edge {
                    return Err(stale(EntityKind::Edge, edge.id, "record differs"));
                }
                for n in edge.nodes {
                    if let Some(list) = self.adjacency.get_mut(&n) {
                        list.retain(|e| *e != edge.id);
                    }
                }
                if let Some(owner) = self.neurons.get_mut(&edge.neuron) {
                    owner.edges.remove(&edge.id);
                }
                self.spatial.remove_edge(edge.id);
                self.edges.remove(&edge.id);
            }
            Delta::Annotate {
                node,
                before,
                after,
            } => {
                let record = self
                    .nodes
                    .get_mut(node)
                    .ok_or_else(|| TraceError::unknown_node(*node))?;
                let expected = Annotation {
                    mark: before.mark.stored(),
                    ..*before
                };
                if record.annotation() != expected {
                    return Err(stale(EntityKind::Node, *node, "annotation differs"));
                }
                record.state = after.state;
                record.mark = after.mark.stored();
            }
            Delta::SetExamined {
                edge,
                before,
                after,
            } => {
                let record = self
                    .edges
                    .get_mut(edge)
                    .ok_or_else(|| TraceError::unknown_edge(*edge))?;
                if record.examined != *before {
                    return Err(stale(EntityKind::Edge, *edge, "examined flag differs"));
                }
                record.examined = *after;
            }
            Delta::MoveNode { node, from, to } => {
                if self.try_node(*node)?.neuron != *from {
                    return Err(stale(EntityKind::Node, *node, "owner differs"));
                }
                self.neuron_mut(*to)?.nodes.insert(*node);
                if let Some(owner) = self.neurons.get_mut(from) {
                    owner.nodes.remove(node);
                }
                if let Some(record) = self.nodes.get_mut(node) {
                    record.neuron = *to;
                }
            }
            Delta::MoveEdge { edge, from, to } => {
                if self.try_edge(*edge)?.neuron != *from {
                    return Err(stale(EntityKind::Edge, *edge, "owner differs"));
                }
                self.neuron_mut(*to)?.edges.insert(*edge);
                if let Some(owner) = self.neurons.get_mut(from) {
                    owner.edges.remove(edge);
                }
                if let Some(record) = self.edges.get_mut(edge) {
                    record.neuron = *to;
                }
            }
        }
        Ok(())
    }

    /// Undoes already-applied deltas, newest first.
    ///
    /// The inverse of an applied delta always fits the store it produced. A
    /// failure means the store no longer matches its own log; the revert
    /// stops there and reports `Corruption`.
    fn revert(&mut self, applied: &[Delta]) -> Result<()> {
        for delta in applied.iter().rev() {
            if let Err(err) = self.apply_delta(&delta.inverse()) {
                return Err(TraceError::corruption(format!(
                    "revert of {delta:?} failed: {err}"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("client", &self.ids.client())
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("neurons", &self.neurons.len())
            .finish()
    }
}

fn stale(kind: EntityKind, id: impl std::fmt::Display, detail: &str) -> TraceError {
    TraceError::StaleDelta {
        kind,
        id: id.to_string(),
        detail: detail.to_string(),
    }
}
