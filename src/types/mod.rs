//! Identifiers, positions and annotation enums shared by every layer.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Bit offset of the client tag inside every entity id.
pub const CLIENT_SHIFT: u32 = 48;
/// Mask selecting the per-client sequence number of an entity id.
pub const SEQ_MASK: u64 = (1u64 << CLIENT_SHIFT) - 1;

/// Tag of the operator session that allocated an id.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
pub struct ClientId(pub u16);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Builds an id from the allocating client and its sequence number.
            pub const fn compose(client: ClientId, seq: u64) -> Self {
                $name(((client.0 as u64) << CLIENT_SHIFT) | (seq & SEQ_MASK))
            }

            /// Client that allocated this id.
            pub const fn client(self) -> ClientId {
                ClientId((self.0 >> CLIENT_SHIFT) as u16)
            }

            /// Per-client sequence number.
            pub const fn seq(self) -> u64 {
                self.0 & SEQ_MASK
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}:{}"), self.client().0, self.seq())
            }
        }
    };
}

entity_id!(
    /// Identifier of a traced node.
    NodeId,
    "n"
);
entity_id!(
    /// Identifier of a traced edge.
    EdgeId,
    "e"
);
entity_id!(
    /// Identifier of a neuron (one skeleton tree).
    NeuronId,
    "u"
);
entity_id!(
    /// Identifier of a committed transaction.
    TxId,
    "t"
);

/// Kind of entity an id refers to, used in error reports.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EntityKind {
    /// A node.
    Node,
    /// An edge.
    Edge,
    /// A neuron.
    Neuron,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => f.write_str("node"),
            EntityKind::Edge => f.write_str("edge"),
            EntityKind::Neuron => f.write_str("neuron"),
        }
    }
}

/// Monotonic id allocator for one client session.
///
/// Sequence numbers start at 1 and are never handed out twice. Ids observed
/// through replay that carry this allocator's client tag push the counters
/// forward, so a session resumed under the same tag cannot collide with its
/// own history.
#[derive(Clone, Debug)]
pub struct IdAllocator {
    client: ClientId,
    next_node: u64,
    next_edge: u64,
    next_neuron: u64,
    next_tx: u64,
}

impl IdAllocator {
    /// Creates an allocator for `client`.
    pub fn new(client: ClientId) -> Self {
        Self {
            client,
            next_node: 1,
            next_edge: 1,
            next_neuron: 1,
            next_tx: 1,
        }
    }

    /// Client tag embedded in every id this allocator produces.
    pub fn client(&self) -> ClientId {
        self.client
    }

    pub(crate) fn node(&mut self) -> NodeId {
        let id = NodeId::compose(self.client, self.next_node);
        self.next_node += 1;
        id
    }

    pub(crate) fn edge(&mut self) -> EdgeId {
        let id = EdgeId::compose(self.client, self.next_edge);
        self.next_edge += 1;
        id
    }

    pub(crate) fn neuron(&mut self) -> NeuronId {
        let id = NeuronId::compose(self.client, self.next_neuron);
        self.next_neuron += 1;
        id
    }

    pub(crate) fn tx(&mut self) -> TxId {
        let id = TxId::compose(self.client, self.next_tx);
        self.next_tx += 1;
        id
    }

    pub(crate) fn observe_node(&mut self, id: NodeId) {
        if id.client() == self.client && id.seq() >= self.next_node {
            self.next_node = id.seq() + 1;
        }
    }

    pub(crate) fn observe_edge(&mut self, id: EdgeId) {
        if id.client() == self.client && id.seq() >= self.next_edge {
            self.next_edge = id.seq() + 1;
        }
    }

    pub(crate) fn observe_neuron(&mut self, id: NeuronId) {
        if id.client() == self.client && id.seq() >= self.next_neuron {
            self.next_neuron = id.seq() + 1;
        }
    }

    pub(crate) fn observe_tx(&mut self, id: TxId) {
        if id.client() == self.client && id.seq() >= self.next_tx {
            self.next_tx = id.seq() + 1;
        }
    }
}

/// A point in volume space.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Position {
    /// The origin.
    pub const ORIGIN: Position = Position::new(0.0, 0.0, 0.0);

    /// Creates a position from its coordinates.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(self, other: Position) -> f64 {
        (self - other).norm()
    }

    /// Length of the vector from the origin.
    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Dot product.
    pub fn dot(self, other: Position) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Linear interpolation; `t = 0` yields `self`, `t = 1` yields `other`.
    pub fn lerp(self, other: Position, t: f64) -> Position {
        self + (other - self) * t
    }

    /// Coordinates as an array.
    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Total lexicographic order over (x, y, z).
    pub fn lexicographic_cmp(&self, other: &Position) -> Ordering {
        self.x
            .total_cmp(&other.x)
            .then_with(|| self.y.total_cmp(&other.y))
            .then_with(|| self.z.total_cmp(&other.z))
    }

    /// Distance from this point to the segment `a`-`b`, with the clamped
    /// segment parameter of the closest point.
    pub fn distance_to_segment(self, a: Position, b: Position) -> (f64, f64) {
        let ab = b - a;
        let len_sq = ab.dot(ab);
        if len_sq < 1e-12 {
            return (self.distance_to(a), 0.0);
        }
        let t = ((self - a).dot(ab) / len_sq).clamp(0.0, 1.0);
        (self.distance_to(a + ab * t), t)
    }
}

impl From<[f64; 3]> for Position {
    fn from(v: [f64; 3]) -> Self {
        Position::new(v[0], v[1], v[2])
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl Add for Position {
    type Output = Position;
    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Position {
    type Output = Position;
    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Position {
    type Output = Position;
    fn mul(self, rhs: f64) -> Position {
        Position::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f64> for Position {
    type Output = Position;
    fn div(self, rhs: f64) -> Position {
        Position::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

/// Annotation state of a node. States are mutually exclusive.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum NodeState {
    /// No annotation.
    #[default]
    Normal,
    /// Tracing finished at this tip.
    End,
    /// Tip ends because the signal is unusable.
    BadEnd,
    /// Tip runs into a tangle of processes.
    Tangle,
    /// Possible branch that could not be confirmed.
    UncertainBranch,
    /// Continuation cannot be resolved from the data.
    NotResolvable,
}

impl NodeState {
    /// States an operator may apply with "end as".
    pub const TERMINAL: [NodeState; 5] = [
        NodeState::End,
        NodeState::BadEnd,
        NodeState::Tangle,
        NodeState::UncertainBranch,
        NodeState::NotResolvable,
    ];

    /// Whether the store only accepts this state on nodes of degree <= 1.
    pub fn requires_leaf(self) -> bool {
        matches!(self, NodeState::End | NodeState::BadEnd)
    }

    /// Whether this is one of the "end as" annotations.
    pub fn is_terminal(self) -> bool {
        !matches!(self, NodeState::Normal)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Normal => "normal",
            NodeState::End => "end",
            NodeState::BadEnd => "bad-end",
            NodeState::Tangle => "tangle",
            NodeState::UncertainBranch => "uncertain-branch",
            NodeState::NotResolvable => "not-resolvable",
        };
        f.write_str(name)
    }
}

/// Neuron-scoped pointer annotation.
///
/// `Mark0` is a clear request: applying it leaves the node with `None`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum Mark {
    /// No mark.
    #[default]
    None,
    /// Clears the mark slot.
    Mark0,
    /// The neuron's single mark.
    Mark1,
}

impl Mark {
    /// The value actually stored on a node after applying this mark.
    pub fn stored(self) -> Mark {
        match self {
            Mark::Mark1 => Mark::Mark1,
            Mark::None | Mark::Mark0 => Mark::None,
        }
    }

    /// Whether the node holds the neuron's mark.
    pub fn is_set(self) -> bool {
        matches!(self, Mark::Mark1)
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mark::None => f.write_str("none"),
            Mark::Mark0 => f.write_str("mark0"),
            Mark::Mark1 => f.write_str("mark1"),
        }
    }
}
