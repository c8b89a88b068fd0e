use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{EdgeId, Mark, NeuronId, NodeId, NodeState, Position};

/// A traced sample point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier.
    pub id: NodeId,
    /// Location in volume space.
    pub position: Position,
    /// Estimated process radius.
    pub radius: f64,
    /// Annotation state.
    pub state: NodeState,
    /// Stored mark, never `Mark0`.
    pub mark: Mark,
    /// Owning neuron.
    pub neuron: NeuronId,
}

impl Node {
    /// Annotation slice of the node.
    pub fn annotation(&self) -> Annotation {
        Annotation {
            state: self.state,
            mark: self.mark,
        }
    }
}

/// The mutable annotation fields of a node.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Annotation state.
    pub state: NodeState,
    /// Stored mark.
    pub mark: Mark,
}

/// A traced segment between two nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Edge identifier.
    pub id: EdgeId,
    /// Endpoints in creation order.
    pub nodes: [NodeId; 2],
    /// Interior samples between the endpoints, ordered from `nodes[0]`.
    pub points: Vec<Position>,
    /// Whether a reviewer has confirmed this edge.
    pub examined: bool,
    /// Owning neuron.
    pub neuron: NeuronId,
}

impl Edge {
    /// Whether `node` is an endpoint.
    pub fn touches(&self, node: NodeId) -> bool {
        self.nodes[0] == node || self.nodes[1] == node
    }

    /// The endpoint opposite `node`, if `node` is an endpoint.
    pub fn other(&self, node: NodeId) -> Option<NodeId> {
        if self.nodes[0] == node {
            Some(self.nodes[1])
        } else if self.nodes[1] == node {
            Some(self.nodes[0])
        } else {
            None
        }
    }
}

/// A connected tree of nodes and edges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neuron {
    /// Neuron identifier.
    pub id: NeuronId,
    /// Designated root node.
    pub root: NodeId,
    /// Member nodes.
    pub nodes: BTreeSet<NodeId>,
    /// Member edges.
    pub edges: BTreeSet<EdgeId>,
}

impl Neuron {
    pub(crate) fn new(id: NeuronId, root: NodeId) -> Self {
        Self {
            id,
            root,
            nodes: BTreeSet::new(),
            edges: BTreeSet::new(),
        }
    }
}

/// Examined/total edge counts of one neuron.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReviewProgress {
    /// Edges flagged examined.
    pub examined: usize,
    /// All edges.
    pub total: usize,
}

impl ReviewProgress {
    /// Whether every edge is examined. A neuron without edges counts as reviewed.
    pub fn is_complete(&self) -> bool {
        self.examined == self.total
    }
}
