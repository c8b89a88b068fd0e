use crate::path::PutativePath;
use crate::storage::GraphStore;
use crate::types::{EdgeId, NodeId, Position};

/// What a picked position resolved to.
#[derive(Clone, Debug, PartialEq)]
pub enum Anchor {
    /// An existing node.
    Node {
        /// The node.
        node: NodeId,
        /// Its position at pick time.
        position: Position,
    },
    /// An interior sample of an edge polyline.
    Edge {
        /// The edge.
        edge: EdgeId,
        /// Index into the edge's interior samples.
        sample: usize,
        /// Position of that sample.
        position: Position,
    },
    /// Empty space.
    Free(Position),
}

impl Anchor {
    /// Where the anchor sits.
    pub fn position(&self) -> Position {
        match self {
            Anchor::Node { position, .. } | Anchor::Edge { position, .. } => *position,
            Anchor::Free(position) => *position,
        }
    }

    /// The node, for node anchors.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Anchor::Node { node, .. } => Some(*node),
            _ => None,
        }
    }

    /// Resolves `pos` against the store: nearest node within `snap`, else
    /// nearest edge sample within `snap`, else free space.
    ///
    /// A hit on an edge endpoint resolves to that endpoint's node.
    pub fn resolve(store: &GraphStore, pos: Position, snap: f64) -> Anchor {
        if let Some(hit) = store.spatial().nearest_node(pos, snap) {
            if let Some(node) = store.node(hit.node) {
                return Anchor::Node {
                    node: node.id,
                    position: node.position,
                };
            }
        }
        if let Some(hit) = store.spatial().nearest_edge(pos, snap) {
            if let Some(edge) = store.edge(hit.edge) {
                let last = edge.points.len() + 1;
                let endpoint = match hit.vertex {
                    0 => Some(edge.nodes[0]),
                    v if v == last => Some(edge.nodes[1]),
                    _ => None,
                };
                return match endpoint.and_then(|n| store.node(n)) {
                    Some(node) => Anchor::Node {
                        node: node.id,
                        position: node.position,
                    },
                    None => Anchor::Edge {
                        edge: edge.id,
                        sample: hit.vertex - 1,
                        position: hit.position,
                    },
                };
            }
        }
        Anchor::Free(pos)
    }

    /// Re-checks the anchor after the graph changed. Anchors whose entity is
    /// gone, or whose sample no longer exists, degrade to free space.
    pub(crate) fn refreshed(&self, store: &GraphStore) -> Anchor {
        match self {
            Anchor::Node { node, position } => match store.node(*node) {
                Some(record) => Anchor::Node {
                    node: *node,
                    position: record.position,
                },
                None => Anchor::Free(*position),
            },
            Anchor::Edge {
                edge,
                sample,
                position,
            } => match store.edge(*edge).and_then(|e| e.points.get(*sample)) {
                Some(at) if at == position => self.clone(),
                _ => Anchor::Free(*position),
            },
            Anchor::Free(_) => self.clone(),
        }
    }
}

/// Operator focus.
///
/// Each variant holds exactly what its state allows; an extend without a
/// putative path cannot be expressed.
#[derive(Clone, Debug, PartialEq)]
pub enum Focus {
    /// Nothing targeted.
    Idle {
        /// Current position, if picked.
        current: Option<Anchor>,
    },
    /// A target is picked.
    HasTarget {
        /// Current position, if picked.
        current: Option<Anchor>,
        /// Target position.
        target: Anchor,
    },
    /// A putative path joins current and target.
    HasPath {
        /// Path start.
        current: Anchor,
        /// Path goal.
        target: Anchor,
        /// The path.
        path: PutativePath,
    },
}

impl Default for Focus {
    fn default() -> Self {
        Focus::Idle { current: None }
    }
}

impl Focus {
    /// Current anchor.
    pub fn current(&self) -> Option<&Anchor> {
        match self {
            Focus::Idle { current } | Focus::HasTarget { current, .. } => current.as_ref(),
            Focus::HasPath { current, .. } => Some(current),
        }
    }

    /// Target anchor.
    pub fn target(&self) -> Option<&Anchor> {
        match self {
            Focus::Idle { .. } => None,
            Focus::HasTarget { target, .. } | Focus::HasPath { target, .. } => Some(target),
        }
    }

    /// Putative path.
    pub fn path(&self) -> Option<&PutativePath> {
        match self {
            Focus::HasPath { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Same anchors without a path.
    pub(crate) fn without_path(&self) -> Focus {
        match self.target() {
            Some(target) => Focus::HasTarget {
                current: self.current().cloned(),
                target: target.clone(),
            },
            None => Focus::Idle {
                current: self.current().cloned(),
            },
        }
    }
}
