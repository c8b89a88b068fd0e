//! Invertible graph deltas and the transactions that group them.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::events::ChangeEvent;
use crate::types::{EdgeId, NeuronId, NodeId, TxId};

use super::types::{Annotation, Edge, Node};

/// One atomic graph change.
///
/// Removals carry the full removed record and updates carry both values, so
/// every delta has an exact inverse and replay can detect stale input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Delta {
    /// Creates an empty neuron with a designated root.
    AddNeuron {
        /// New neuron.
        id: NeuronId,
        /// Its root node (added by a later delta of the same transaction).
        root: NodeId,
    },
    /// Destroys an empty neuron.
    RemoveNeuron {
        /// Neuron to remove.
        id: NeuronId,
        /// Its root at removal time.
        root: NodeId,
    },
    /// Re-roots a neuron.
    SetRoot {
        /// Neuron to re-root.
        neuron: NeuronId,
        /// Expected current root.
        before: NodeId,
        /// New root.
        after: NodeId,
    },
    /// Inserts a node.
    AddNode(Node),
    /// Removes a node with no incident edges.
    RemoveNode(Node),
    /// Inserts an edge.
    AddEdge(Edge),
    /// Removes an edge.
    RemoveEdge(Edge),
    /// Changes a node's state and mark.
    Annotate {
        /// Node to update.
        node: NodeId,
        /// Expected current annotation.
        before: Annotation,
        /// New annotation.
        after: Annotation,
    },
    /// Changes an edge's examined flag.
    SetExamined {
        /// Edge to update.
        edge: EdgeId,
        /// Expected current flag.
        before: bool,
        /// New flag.
        after: bool,
    },
    /// Transfers a node between neurons.
    MoveNode {
        /// Node to move.
        node: NodeId,
        /// Current owner.
        from: NeuronId,
        /// New owner.
        to: NeuronId,
    },
    /// Transfers an edge between neurons.
    MoveEdge {
        /// Edge to move.
        edge: EdgeId,
        /// Current owner.
        from: NeuronId,
        /// New owner.
        to: NeuronId,
    },
}

impl Delta {
    /// The delta that exactly undoes this one.
    pub fn inverse(&self) -> Delta {
        match self {
            Delta::AddNeuron { id, root } => Delta::RemoveNeuron {
                id: *id,
                root: *root,
            },
            Delta::RemoveNeuron { id, root } => Delta::AddNeuron {
                id: *id,
                root: *root,
            },
            Delta::SetRoot {
                neuron,
                before,
                after,
            } => Delta::SetRoot {
                neuron: *neuron,
                before: *after,
                after: *before,
            },
            Delta::AddNode(node) => Delta::RemoveNode(node.clone()),
            Delta::RemoveNode(node) => Delta::AddNode(node.clone()),
            Delta::AddEdge(edge) => Delta::RemoveEdge(edge.clone()),
            Delta::RemoveEdge(edge) => Delta::AddEdge(edge.clone()),
            Delta::Annotate {
                node,
                before,
                after,
            } => Delta::Annotate {
                node: *node,
                before: *after,
                after: *before,
            },
            Delta::SetExamined {
                edge,
                before,
                after,
            } => Delta::SetExamined {
                edge: *edge,
                before: *after,
                after: *before,
            },
            Delta::MoveNode { node, from, to } => Delta::MoveNode {
                node: *node,
                from: *to,
                to: *from,
            },
            Delta::MoveEdge { edge, from, to } => Delta::MoveEdge {
                edge: *edge,
                from: *to,
                to: *from,
            },
        }
    }

    /// Adds every neuron whose invariants this delta can affect.
    pub(crate) fn collect_neurons(&self, out: &mut BTreeSet<NeuronId>) {
        match self {
            Delta::AddNeuron { id, .. } | Delta::RemoveNeuron { id, .. } => {
                out.insert(*id);
            }
            Delta::SetRoot { neuron, .. } => {
                out.insert(*neuron);
            }
            Delta::AddNode(node) | Delta::RemoveNode(node) => {
                out.insert(node.neuron);
            }
            Delta::AddEdge(edge) | Delta::RemoveEdge(edge) => {
                out.insert(edge.neuron);
            }
            Delta::MoveNode { from, to, .. } | Delta::MoveEdge { from, to, .. } => {
                out.insert(*from);
                out.insert(*to);
            }
            // Annotations are checked against the owning neuron at commit time.
            Delta::Annotate { .. } | Delta::SetExamined { .. } => {}
        }
    }

    /// Presentation event announcing this delta.
    pub(crate) fn event(&self) -> ChangeEvent {
        match self {
            Delta::AddNeuron { id, .. } => ChangeEvent::NeuronAdded(*id),
            Delta::RemoveNeuron { id, .. } => ChangeEvent::NeuronRemoved(*id),
            Delta::SetRoot { neuron, .. } => ChangeEvent::NeuronUpdated(*neuron),
            Delta::AddNode(node) => ChangeEvent::NodeAdded(node.id),
            Delta::RemoveNode(node) => ChangeEvent::NodeRemoved(node.id),
            Delta::AddEdge(edge) => ChangeEvent::EdgeAdded(edge.id),
            Delta::RemoveEdge(edge) => ChangeEvent::EdgeRemoved(edge.id),
            Delta::Annotate { node, .. } | Delta::MoveNode { node, .. } => {
                ChangeEvent::NodeUpdated(*node)
            }
            Delta::SetExamined { edge, .. } | Delta::MoveEdge { edge, .. } => {
                ChangeEvent::EdgeUpdated(*edge)
            }
        }
    }
}

/// What produced a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    /// New neuron seeded at a point.
    CreateNeuron,
    /// Path appended from the current node.
    Extend,
    /// Path attached at a branch point.
    Branch,
    /// Node annotation changed.
    Annotate,
    /// Mark placed or cleared.
    Mark,
    /// Edges flagged examined.
    Examine,
    /// Edges removed.
    DeleteEdges,
    /// Node removed with its incident edges.
    DeleteNode,
    /// Inverse of an earlier transaction.
    Undo(TxId),
    /// Re-application of an undone transaction.
    Redo(TxId),
    /// Temporary rewind of unpublished local work during a pull.
    Rebase,
    /// Direct store use outside the edit engine.
    Manual,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxKind::CreateNeuron => f.write_str("create-neuron"),
            TxKind::Extend => f.write_str("extend"),
            TxKind::Branch => f.write_str("branch"),
            TxKind::Annotate => f.write_str("annotate"),
            TxKind::Mark => f.write_str("mark"),
            TxKind::Examine => f.write_str("examine"),
            TxKind::DeleteEdges => f.write_str("delete-edges"),
            TxKind::DeleteNode => f.write_str("delete-node"),
            TxKind::Undo(tx) => write!(f, "undo({tx})"),
            TxKind::Redo(tx) => write!(f, "redo({tx})"),
            TxKind::Rebase => f.write_str("rebase"),
            TxKind::Manual => f.write_str("manual"),
        }
    }
}

/// A committed, ordered group of deltas. The unit of undo and sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id.
    pub id: TxId,
    /// What produced it.
    pub kind: TxKind,
    /// Deltas in application order.
    pub deltas: Vec<Delta>,
}

impl Transaction {
    /// Whether the transaction changes nothing.
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// The transaction that undoes this one, under a fresh id.
    pub fn inverse(&self, id: TxId, kind: TxKind) -> Transaction {
        Transaction {
            id,
            kind,
            deltas: self.deltas.iter().rev().map(Delta::inverse).collect(),
        }
    }

    /// Neurons whose invariants this transaction can affect.
    pub fn neurons(&self) -> BTreeSet<NeuronId> {
        let mut out = BTreeSet::new();
        for delta in &self.deltas {
            delta.collect_neurons(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientId, Mark, NodeState, Position};

    fn node(seq: u64) -> Node {
        Node {
            id: NodeId::compose(ClientId(1), seq),
            position: Position::new(seq as f64, 0.0, 0.0),
            radius: 1.0,
            state: NodeState::Normal,
            mark: Mark::None,
            neuron: NeuronId::compose(ClientId(1), 1),
        }
    }

    #[test]
    fn inverse_is_an_involution() {
        let deltas = vec![
            Delta::AddNode(node(1)),
            Delta::Annotate {
                node: node(1).id,
                before: Annotation::default(),
                after: Annotation {
                    state: NodeState::End,
                    mark: Mark::Mark1,
                },
            },
            Delta::MoveNode {
                node: node(1).id,
                from: NeuronId::compose(ClientId(1), 1),
                to: NeuronId::compose(ClientId(1), 2),
            },
        ];
        for delta in deltas {
            assert_eq!(delta.inverse().inverse(), delta);
        }
    }

    #[test]
    fn transaction_inverse_reverses_order() {
        let tx = Transaction {
            id: TxId::compose(ClientId(1), 1),
            kind: TxKind::Extend,
            deltas: vec![Delta::AddNode(node(1)), Delta::AddNode(node(2))],
        };
        let inv = tx.inverse(TxId::compose(ClientId(1), 2), TxKind::Undo(tx.id));
        assert_eq!(
            inv.deltas,
            vec![Delta::RemoveNode(node(2)), Delta::RemoveNode(node(1))]
        );
        assert_eq!(inv.kind, TxKind::Undo(tx.id));
    }

    #[test]
    fn transactions_survive_json() {
        let tx = Transaction {
            id: TxId::compose(ClientId(2), 9),
            kind: TxKind::Redo(TxId::compose(ClientId(2), 3)),
            deltas: vec![Delta::SetExamined {
                edge: EdgeId::compose(ClientId(2), 4),
                before: false,
                after: true,
            }],
        };
        let bytes = serde_json::to_vec(&tx).unwrap();
        let back: Transaction = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, tx);
    }
}
