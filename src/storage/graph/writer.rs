use std::collections::BTreeSet;

use tracing::{debug, error, warn};

use crate::error::{Result, TraceError};
use crate::events::ChangeEvent;
use crate::types::{EdgeId, Mark, NeuronId, NodeId, NodeState, Position, TxId};

use super::validate::validate_neurons;
use super::GraphStore;
use crate::storage::delta::{Delta, Transaction, TxKind};
use crate::storage::types::{Annotation, Edge, Node};

/// The state of a write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting operations.
    Active,
    /// Validated and published.
    Committed,
    /// Reverted; the graph is as it was before `begin`.
    RolledBack,
}

/// A write transaction over a [`GraphStore`].
///
/// # Lifecycle
///
/// 1. Create with [`GraphStore::begin`].
/// 2. Perform operations; each is applied immediately and can be observed
///    through [`WriteTx::store`]. A failing operation leaves no partial deltas.
/// 3. [`commit`](WriteTx::commit) validates every touched neuron and either
///    publishes the transaction or reverts it. [`rollback`](WriteTx::rollback)
///    or dropping the handle reverts.
pub struct WriteTx<'g> {
    store: &'g mut GraphStore,
    id: TxId,
    kind: TxKind,
    origin: &'static str,
    applied: Vec<Delta>,
    state: TxState,
}

impl<'g> WriteTx<'g> {
    pub(super) fn new(store: &'g mut GraphStore, id: TxId, kind: TxKind, origin: &'static str) -> Self {
        debug!(tx = %id, kind = %kind, origin, "transaction started");
        Self {
            store,
            id,
            kind,
            origin,
            applied: Vec::new(),
            state: TxState::Active,
        }
    }

    /// Transaction id.
    pub fn id(&self) -> TxId {
        self.id
    }

    /// What the transaction does.
    pub fn kind(&self) -> TxKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// The store with this transaction's changes applied.
    pub fn store(&self) -> &GraphStore {
        &*self.store
    }

    /// Deltas applied so far.
    pub fn deltas(&self) -> &[Delta] {
        &self.applied
    }

    pub(super) fn push(&mut self, delta: Delta) -> Result<()> {
        self.store.apply_delta(&delta)?;
        self.applied.push(delta);
        Ok(())
    }

    /// Runs `op`; if it fails, reverts whatever it applied.
    fn atomically<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let mark = self.applied.len();
        match op(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                let partial = self.applied.split_off(mark);
                self.store.revert(&partial)?;
                Err(err)
            }
        }
    }

    /// Creates a neuron rooted at a new node.
    pub fn create_neuron(&mut self, position: Position, radius: Option<f64>) -> Result<(NeuronId, NodeId)> {
        self.atomically(|tx| {
            let neuron = tx.store.ids.neuron();
            let node = tx.store.ids.node();
            tx.push(Delta::AddNeuron { id: neuron, root: node })?;
            let radius = radius.unwrap_or(tx.store.default_radius);
            tx.push(Delta::AddNode(Node {
                id: node,
                position,
                radius,
                state: NodeState::Normal,
                mark: Mark::None,
                neuron,
            }))?;
            Ok((neuron, node))
        })
    }

    /// Creates an unconnected node in `neuron`. It must be connected before commit.
    pub fn create_node(&mut self, neuron: NeuronId, position: Position, radius: Option<f64>) -> Result<NodeId> {
        self.store.try_neuron(neuron)?;
        let id = self.store.ids.node();
        let radius = radius.unwrap_or(self.store.default_radius);
        self.push(Delta::AddNode(Node {
            id,
            position,
            radius,
            state: NodeState::Normal,
            mark: Mark::None,
            neuron,
        }))?;
        Ok(id)
    }

    /// Joins two nodes of the same neuron that are not yet connected.
    pub fn create_edge(&mut self, a: NodeId, b: NodeId, points: Vec<Position>) -> Result<EdgeId> {
        if a == b {
            return Err(TraceError::SelfLoop(a));
        }
        let node_a = self.store.try_node(a)?;
        let node_b = self.store.try_node(b)?;
        if node_a.neuron != node_b.neuron {
            return Err(TraceError::CrossNeuronEdge {
                a,
                neuron_a: node_a.neuron,
                b,
                neuron_b: node_b.neuron,
            });
        }
        let neuron = node_a.neuron;
        for node in [node_a, node_b] {
            let degree = self.store.degree(node.id) + 1;
            if node.state.requires_leaf() && degree > 1 {
                return Err(TraceError::InvalidStateForDegree {
                    node: node.id,
                    state: node.state,
                    degree,
                });
            }
        }
        if self.store.connected(a, b) {
            return Err(TraceError::CycleViolation { neuron, a, b });
        }
        let id = self.store.ids.edge();
        self.push(Delta::AddEdge(Edge {
            id,
            nodes: [a, b],
            points,
            examined: false,
            neuron,
        }))?;
        Ok(id)
    }

    /// Sets a node's annotation state.
    pub fn set_state(&mut self, node: NodeId, state: NodeState) -> Result<()> {
        let record = self.store.try_node(node)?;
        let degree = self.store.degree(node);
        if state.requires_leaf() && degree > 1 {
            return Err(TraceError::InvalidStateForDegree { node, state, degree });
        }
        let before = record.annotation();
        if before.state == state {
            return Ok(());
        }
        self.push(Delta::Annotate {
            node,
            before,
            after: Annotation { state, ..before },
        })
    }

    /// Places or clears the neuron's mark. Placing `Mark1` moves it off any other holder.
    pub fn set_mark(&mut self, node: NodeId, mark: Mark) -> Result<()> {
        self.atomically(|tx| {
            let record = tx.store.try_node(node)?;
            let stored = mark.stored();
            let before = record.annotation();
            if stored.is_set() {
                let holders: Vec<NodeId> = tx
                    .store
                    .try_neuron(record.neuron)?
                    .nodes
                    .iter()
                    .copied()
                    .filter(|n| *n != node && tx.store.node(*n).is_some_and(|o| o.mark.is_set()))
                    .collect();
                for holder in holders {
                    let prev = tx.store.try_node(holder)?.annotation();
                    tx.push(Delta::Annotate {
                        node: holder,
                        before: prev,
                        after: Annotation {
                            mark: Mark::None,
                            ..prev
                        },
                    })?;
                }
            }
            if before.mark != stored {
                tx.push(Delta::Annotate {
                    node,
                    before,
                    after: Annotation {
                        mark: stored,
                        ..before
                    },
                })?;
            }
            Ok(())
        })
    }

    /// Sets an edge's examined flag. Returns whether it changed.
    pub fn set_examined(&mut self, edge: EdgeId, examined: bool) -> Result<bool> {
        let before = self.store.try_edge(edge)?.examined;
        if before == examined {
            return Ok(false);
        }
        self.push(Delta::SetExamined {
            edge,
            before,
            after: examined,
        })?;
        Ok(true)
    }

    /// Splits an edge at one of its interior samples, returning the new node.
    ///
    /// Both halves keep the original examined flag.
    pub fn split_edge(&mut self, edge: EdgeId, sample: usize) -> Result<NodeId> {
        self.atomically(|tx| {
            let original = tx.store.try_edge(edge)?.clone();
            let Some(&position) = original.points.get(sample) else {
                return Err(TraceError::InvalidEdit(format!(
                    "edge {edge} has no interior sample {sample}"
                )));
            };
            tx.push(Delta::RemoveEdge(original.clone()))?;
            let middle = tx.create_node(original.neuron, position, None)?;
            let [a, b] = original.nodes;
            for (nodes, points) in [
                ([a, middle], original.points[..sample].to_vec()),
                ([middle, b], original.points[sample + 1..].to_vec()),
            ] {
                let id = tx.store.ids.edge();
                tx.push(Delta::AddEdge(Edge {
                    id,
                    nodes,
                    points,
                    examined: original.examined,
                    neuron: original.neuron,
                }))?;
            }
            Ok(middle)
        })
    }

    /// Deletes one edge. See [`WriteTx::delete_edges`].
    pub fn delete_edge(&mut self, edge: EdgeId) -> Result<()> {
        self.delete_edges(&[edge])
    }

    /// Deletes a set of edges.
    ///
    /// Afterwards, in each affected neuron, the part holding the root keeps
    /// the neuron id. Other parts that still have edges become new neurons
    /// rooted at their marked node or else at a node incident to a cut. Parts
    /// reduced to a single node are removed.
    pub fn delete_edges(&mut self, edges: &[EdgeId]) -> Result<()> {
        self.atomically(|tx| {
            let mut cut: Vec<(NeuronId, NodeId)> = Vec::new();
            let mut unique: BTreeSet<EdgeId> = BTreeSet::new();
            for &edge in edges {
                if !unique.insert(edge) {
                    continue;
                }
                let record = tx.store.try_edge(edge)?.clone();
                cut.push((record.neuron, record.nodes[0]));
                cut.push((record.neuron, record.nodes[1]));
                tx.push(Delta::RemoveEdge(record))?;
            }
            let neurons: BTreeSet<NeuronId> = cut.iter().map(|(n, _)| *n).collect();
            for neuron in neurons {
                let mut seeds: Vec<NodeId> = cut
                    .iter()
                    .filter(|(n, _)| *n == neuron)
                    .map(|(_, node)| *node)
                    .collect();
                seeds.sort_unstable();
                seeds.dedup();
                tx.settle(neuron, &seeds, true)?;
            }
            Ok(())
        })
    }

    /// Deletes a node and its incident edges.
    ///
    /// Every remaining part becomes or stays a neuron. If the root was
    /// deleted, the part of the lowest former neighbour keeps the neuron id.
    pub fn delete_node(&mut self, node: NodeId) -> Result<()> {
        self.atomically(|tx| {
            let record = tx.store.try_node(node)?.clone();
            let incident: Vec<EdgeId> = tx.store.incident_edges(node).to_vec();
            let mut seeds: Vec<NodeId> = tx.store.neighbors(node).collect();
            seeds.sort_unstable();
            for edge in incident {
                let edge = tx.store.try_edge(edge)?.clone();
                tx.push(Delta::RemoveEdge(edge))?;
            }
            tx.push(Delta::RemoveNode(record.clone()))?;
            let neuron = tx.store.try_neuron(record.neuron)?;
            if neuron.nodes.is_empty() {
                let root = neuron.root;
                tx.push(Delta::RemoveNeuron {
                    id: record.neuron,
                    root,
                })?;
                return Ok(());
            }
            tx.settle(record.neuron, &seeds, false)
        })
    }

    /// Restores one-component-per-neuron after removals.
    fn settle(&mut self, neuron_id: NeuronId, seeds: &[NodeId], prune_singles: bool) -> Result<()> {
        let neuron = self.store.try_neuron(neuron_id)?;
        let root = neuron.root;
        let root_alive = neuron.nodes.contains(&root);
        let components = self.store.components(neuron_id)?;
        if components.len() <= 1 && root_alive {
            return Ok(());
        }
        let keeper = if root_alive {
            components.iter().position(|c| c.contains(&root))
        } else {
            seeds
                .iter()
                .find_map(|s| components.iter().position(|c| c.contains(s)))
        }
        .unwrap_or(0);

        let mut split = 0usize;
        for (i, component) in components.iter().enumerate() {
            if i == keeper {
                continue;
            }
            if prune_singles && component.len() == 1 {
                for &orphan in component {
                    let record = self.store.try_node(orphan)?.clone();
                    self.push(Delta::RemoveNode(record))?;
                }
                continue;
            }
            let new_root = self.pick_root(component, seeds);
            let new_id = self.store.ids.neuron();
            self.push(Delta::AddNeuron {
                id: new_id,
                root: new_root,
            })?;
            for &node in component {
                self.push(Delta::MoveNode {
                    node,
                    from: neuron_id,
                    to: new_id,
                })?;
            }
            let moved: Vec<EdgeId> = self
                .store
                .try_neuron(neuron_id)?
                .edges
                .iter()
                .copied()
                .filter(|e| {
                    self.store
                        .edge(*e)
                        .is_some_and(|edge| component.contains(&edge.nodes[0]))
                })
                .collect();
            for edge in moved {
                self.push(Delta::MoveEdge {
                    edge,
                    from: neuron_id,
                    to: new_id,
                })?;
            }
            split += 1;
        }

        if !root_alive {
            if let Some(component) = components.get(keeper) {
                let new_root = self.pick_root(component, seeds);
                self.push(Delta::SetRoot {
                    neuron: neuron_id,
                    before: root,
                    after: new_root,
                })?;
            }
        }
        if split > 0 {
            self.store.metrics.neuron_split();
            debug!(neuron = %neuron_id, parts = split + 1, "neuron split");
        }
        Ok(())
    }

    fn pick_root(&self, component: &BTreeSet<NodeId>, seeds: &[NodeId]) -> NodeId {
        let marked = component
            .iter()
            .copied()
            .find(|n| self.store.node(*n).is_some_and(|node| node.mark.is_set()));
        marked
            .or_else(|| seeds.iter().copied().find(|s| component.contains(s)))
            .or_else(|| component.first().copied())
            .unwrap_or_else(|| NodeId(0))
    }

    /// Validates and publishes the transaction, or reverts it.
    pub fn commit(mut self) -> Result<Transaction> {
        let deltas = std::mem::take(&mut self.applied);
        let mut touched = BTreeSet::new();
        for delta in &deltas {
            delta.collect_neurons(&mut touched);
            if let Delta::Annotate { node, .. } = delta {
                if let Some(record) = self.store.node(*node) {
                    touched.insert(record.neuron);
                }
            }
        }
        if let Err(err) = validate_neurons(&*self.store, &touched) {
            self.state = TxState::RolledBack;
            self.store.metrics.transaction(self.origin, false);
            self.store.revert(&deltas)?;
            debug!(tx = %self.id, kind = %self.kind, error = %err, "transaction rejected");
            return Err(err);
        }
        self.state = TxState::Committed;
        for delta in &deltas {
            match delta {
                Delta::AddNode(_) => self.store.metrics.node_created(),
                Delta::RemoveNode(_) => self.store.metrics.node_deleted(),
                Delta::AddEdge(_) => self.store.metrics.edge_created(),
                Delta::RemoveEdge(_) => self.store.metrics.edge_deleted(),
                _ => {}
            }
            self.store.sink.publish(delta.event());
        }
        self.store.sink.publish(ChangeEvent::Committed {
            tx: self.id,
            kind: self.kind,
        });
        self.store.metrics.transaction(self.origin, true);
        debug!(
            tx = %self.id,
            kind = %self.kind,
            origin = self.origin,
            deltas = deltas.len(),
            "transaction committed"
        );
        Ok(Transaction {
            id: self.id,
            kind: self.kind,
            deltas,
        })
    }

    /// Reverts every change made by this transaction.
    ///
    /// Fails only with `Corruption`, when the store cannot be brought back.
    pub fn rollback(mut self) -> Result<()> {
        self.revert_all()
    }

    fn revert_all(&mut self) -> Result<()> {
        let applied = std::mem::take(&mut self.applied);
        self.state = TxState::RolledBack;
        self.store.revert(&applied)?;
        debug!(tx = %self.id, deltas = applied.len(), "transaction rolled back");
        Ok(())
    }
}

impl Drop for WriteTx<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            if !self.applied.is_empty() {
                warn!(tx = %self.id, "transaction dropped without commit, reverting");
            }
            if let Err(err) = self.revert_all() {
                error!(tx = %self.id, error = %err, "revert of dropped transaction failed");
            }
        }
    }
}
