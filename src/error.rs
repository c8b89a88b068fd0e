use thiserror::Error;
use tracing::error;

use crate::sync::Revision;
use crate::types::{EdgeId, EntityKind, Mark, NeuronId, NodeId, NodeState};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TraceError>;

/// Every refusal the engine can report.
///
/// Validation errors leave the graph unchanged. Sync errors are recoverable by
/// retrying (transport) or by pulling and retrying (conflict). `Corruption` is
/// the only variant that indicates a bug.
#[derive(Debug, Error)]
pub enum TraceError {
    /// An id does not name a live entity.
    #[error("unknown {kind} id {id}")]
    UnknownId {
        /// What kind of entity was looked up.
        kind: EntityKind,
        /// Raw id value as displayed.
        id: String,
    },
    /// The edge would connect two nodes already connected in the tree.
    #[error("edge {a}-{b} would close a cycle in neuron {neuron}")]
    CycleViolation {
        /// Neuron containing both endpoints.
        neuron: NeuronId,
        /// First endpoint.
        a: NodeId,
        /// Second endpoint.
        b: NodeId,
    },
    /// The edge endpoints belong to different neurons.
    #[error("edge {a}-{b} crosses neurons {neuron_a} and {neuron_b}")]
    CrossNeuronEdge {
        /// First endpoint.
        a: NodeId,
        /// Neuron of the first endpoint.
        neuron_a: NeuronId,
        /// Second endpoint.
        b: NodeId,
        /// Neuron of the second endpoint.
        neuron_b: NeuronId,
    },
    /// The node's state is only valid on leaves.
    #[error("state {state} on node {node} requires degree <= 1, found degree {degree}")]
    InvalidStateForDegree {
        /// Offending node.
        node: NodeId,
        /// State that requires a leaf.
        state: NodeState,
        /// Degree the node has (or would have).
        degree: usize,
    },
    /// A neuron would carry the same mark on two nodes.
    #[error("neuron {neuron} would carry {mark} on both {first} and {second}")]
    DuplicateMark {
        /// Neuron holding the marks.
        neuron: NeuronId,
        /// The duplicated mark.
        mark: Mark,
        /// One holder.
        first: NodeId,
        /// The other holder.
        second: NodeId,
    },
    /// Both endpoints of an edge are the same node.
    #[error("edge endpoints must be distinct, got {0} twice")]
    SelfLoop(NodeId),
    /// A neuron no longer forms a single connected component.
    #[error("neuron {neuron} is disconnected: {reachable} of {total} nodes reachable from root")]
    Disconnected {
        /// Neuron that fell apart.
        neuron: NeuronId,
        /// Nodes reachable from its root.
        reachable: usize,
        /// Nodes the neuron owns.
        total: usize,
    },
    /// A neuron was left without nodes but not removed.
    #[error("neuron {0} has no nodes")]
    EmptyNeuron(NeuronId),
    /// A replayed delta no longer matches the current value it expects to replace.
    #[error("stale delta for {kind} {id}: {detail}")]
    StaleDelta {
        /// Entity kind the delta touches.
        kind: EntityKind,
        /// Entity id as displayed.
        id: String,
        /// What did not match.
        detail: String,
    },
    /// The node's annotation forbids the requested operation.
    #[error("node {node} is annotated {state}, cannot {operation}")]
    ConflictingState {
        /// Annotated node.
        node: NodeId,
        /// Its state.
        state: NodeState,
        /// What was attempted.
        operation: &'static str,
    },
    /// The operation is not available in the current focus state.
    #[error("invalid edit: {0}")]
    InvalidEdit(String),
    /// The commit was based on a stale revision.
    #[error("revision conflict: expected {expected}, repository is at {actual}")]
    Conflict {
        /// Revision the commit was based on.
        expected: Revision,
        /// Revision the repository holds.
        actual: Revision,
    },
    /// The repository could not be reached or rejected the request.
    #[error("transport failure: {0}")]
    Transport(String),
    /// A sample position lies outside the volume.
    #[error("position out of volume bounds")]
    OutOfBounds,
    /// Encoding or decoding a transaction failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Internal invariant broken outside the validated path.
    #[error("corruption detected: {0}")]
    Corruption(String),
}

impl TraceError {
    /// Whether this error is a rejected transaction that left the graph untouched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TraceError::UnknownId { .. }
                | TraceError::CycleViolation { .. }
                | TraceError::CrossNeuronEdge { .. }
                | TraceError::InvalidStateForDegree { .. }
                | TraceError::DuplicateMark { .. }
                | TraceError::SelfLoop(_)
                | TraceError::Disconnected { .. }
                | TraceError::EmptyNeuron(_)
                | TraceError::StaleDelta { .. }
                | TraceError::ConflictingState { .. }
        )
    }

    pub(crate) fn unknown_node(id: NodeId) -> Self {
        TraceError::UnknownId {
            kind: EntityKind::Node,
            id: id.to_string(),
        }
    }

    pub(crate) fn unknown_edge(id: EdgeId) -> Self {
        TraceError::UnknownId {
            kind: EntityKind::Edge,
            id: id.to_string(),
        }
    }

    pub(crate) fn unknown_neuron(id: NeuronId) -> Self {
        TraceError::UnknownId {
            kind: EntityKind::Neuron,
            id: id.to_string(),
        }
    }

    /// Builds a `Corruption` error and logs the diagnostic state with it.
    pub(crate) fn corruption(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        error!(detail = %detail, "graph invariant broken outside validated path");
        TraceError::Corruption(detail)
    }
}

impl From<serde_json::Error> for TraceError {
    fn from(err: serde_json::Error) -> Self {
        TraceError::Serialization(err.to_string())
    }
}
