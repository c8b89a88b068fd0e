//! Grid-hashed proximity index over nodes and edge polylines.
//!
//! The index answers "what is near this point" for picking. It is updated in
//! lockstep with the graph store and never consulted for validation.

use std::cmp::Ordering;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::types::{EdgeId, NodeId, Position};

/// Integer cell coordinate of the grid hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridKey {
    /// Cell x.
    pub x: i64,
    /// Cell y.
    pub y: i64,
    /// Cell z.
    pub z: i64,
}

impl GridKey {
    /// Cell containing `pos`.
    #[inline]
    pub fn from_pos(pos: Position, cell_size: f64) -> Self {
        Self {
            x: (pos.x / cell_size).floor() as i64,
            y: (pos.y / cell_size).floor() as i64,
            z: (pos.z / cell_size).floor() as i64,
        }
    }

    fn range(lo: GridKey, hi: GridKey) -> impl Iterator<Item = GridKey> {
        (lo.x..=hi.x).flat_map(move |x| {
            (lo.y..=hi.y).flat_map(move |y| (lo.z..=hi.z).map(move |z| GridKey { x, y, z }))
        })
    }

    /// Number of cells in the box `lo..=hi`, saturating.
    fn volume(lo: GridKey, hi: GridKey) -> u128 {
        let span = |a: i64, b: i64| (b as i128 - a as i128 + 1).max(0) as u128;
        span(lo.x, hi.x)
            .saturating_mul(span(lo.y, hi.y))
            .saturating_mul(span(lo.z, hi.z))
    }

    fn axis(&self, axis: usize) -> i64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    fn step(&mut self, axis: usize, by: i64) {
        match axis {
            0 => self.x += by,
            1 => self.y += by,
            _ => self.z += by,
        }
    }
}

/// Cells crossed by the segment `a`-`b`, in traversal order (3D DDA).
fn segment_cells(a: Position, b: Position, cell_size: f64, out: &mut Vec<GridKey>) {
    let mut key = GridKey::from_pos(a, cell_size);
    let end = GridKey::from_pos(b, cell_size);
    out.push(key);
    let (from, delta) = (a.to_array(), (b - a).to_array());
    let mut step = [0i64; 3];
    let mut t_max = [f64::INFINITY; 3];
    let mut t_delta = [f64::INFINITY; 3];
    for axis in 0..3 {
        let d = delta[axis];
        if d == 0.0 || !d.is_finite() {
            continue;
        }
        step[axis] = if d > 0.0 { 1 } else { -1 };
        let boundary = (key.axis(axis) + i64::from(d > 0.0)) as f64 * cell_size;
        t_max[axis] = (boundary - from[axis]) / d;
        t_delta[axis] = cell_size / d.abs();
    }
    // Each step crosses one boundary; the key distance bounds the walk.
    let steps = (0..3)
        .map(|axis| end.axis(axis).abs_diff(key.axis(axis)))
        .fold(0u64, u64::saturating_add);
    for _ in 0..steps {
        let axis = (0..3)
            .filter(|axis| step[*axis] != 0)
            .min_by(|x, y| t_max[*x].total_cmp(&t_max[*y]));
        let Some(axis) = axis else {
            break;
        };
        key.step(axis, step[axis]);
        t_max[axis] += t_delta[axis];
        out.push(key);
    }
    if key != end {
        out.push(end);
    }
}

/// A node found near a query point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeHit {
    /// The node.
    pub node: NodeId,
    /// Distance from the query point.
    pub distance: f64,
}

/// An edge found near a query point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeHit {
    /// The edge.
    pub edge: EdgeId,
    /// Index of the nearest polyline vertex, counting both endpoints.
    pub vertex: usize,
    /// Position of that vertex.
    pub position: Position,
    /// Distance from the query point to the polyline.
    pub distance: f64,
}

/// Grid hash over node positions and edge polylines.
#[derive(Clone, Debug)]
pub struct SpatialIndex {
    cell_size: f64,
    node_cells: FxHashMap<GridKey, SmallVec<[NodeId; 4]>>,
    node_pos: FxHashMap<NodeId, Position>,
    edge_cells: FxHashMap<GridKey, SmallVec<[EdgeId; 4]>>,
    edge_lines: FxHashMap<EdgeId, (Vec<Position>, Vec<GridKey>)>,
}

impl SpatialIndex {
    /// Creates an empty index with the given cell edge length.
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: if cell_size > 0.0 { cell_size } else { 1.0 },
            node_cells: FxHashMap::default(),
            node_pos: FxHashMap::default(),
            edge_cells: FxHashMap::default(),
            edge_lines: FxHashMap::default(),
        }
    }

    /// Cell edge length.
    #[inline]
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Number of indexed nodes.
    pub fn node_count(&self) -> usize {
        self.node_pos.len()
    }

    /// Number of indexed edges.
    pub fn edge_count(&self) -> usize {
        self.edge_lines.len()
    }

    /// Indexes a node, replacing any earlier entry for the same id.
    pub fn insert_node(&mut self, id: NodeId, pos: Position) {
        self.remove_node(id);
        let key = GridKey::from_pos(pos, self.cell_size);
        self.node_cells.entry(key).or_default().push(id);
        self.node_pos.insert(id, pos);
    }

    /// Drops a node. Returns whether it was indexed.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(pos) = self.node_pos.remove(&id) else {
            return false;
        };
        let key = GridKey::from_pos(pos, self.cell_size);
        if let Some(ids) = self.node_cells.get_mut(&key) {
            ids.retain(|n| *n != id);
            if ids.is_empty() {
                self.node_cells.remove(&key);
            }
        }
        true
    }

    /// Indexes an edge polyline (endpoints included), replacing any earlier entry.
    pub fn insert_edge(&mut self, id: EdgeId, line: Vec<Position>) {
        self.remove_edge(id);
        let mut keys: Vec<GridKey> = Vec::new();
        for seg in line.windows(2) {
            segment_cells(seg[0], seg[1], self.cell_size, &mut keys);
        }
        if line.len() == 1 {
            keys.push(GridKey::from_pos(line[0], self.cell_size));
        }
        keys.sort_unstable();
        keys.dedup();
        for key in &keys {
            self.edge_cells.entry(*key).or_default().push(id);
        }
        self.edge_lines.insert(id, (line, keys));
    }

    /// Drops an edge. Returns whether it was indexed.
    pub fn remove_edge(&mut self, id: EdgeId) -> bool {
        let Some((_, keys)) = self.edge_lines.remove(&id) else {
            return false;
        };
        for key in keys {
            if let Some(ids) = self.edge_cells.get_mut(&key) {
                ids.retain(|e| *e != id);
                if ids.is_empty() {
                    self.edge_cells.remove(&key);
                }
            }
        }
        true
    }

    /// Nodes within `radius` of `pos`, nearest first, ties by id.
    pub fn nodes_within(&self, pos: Position, radius: f64) -> Vec<NodeHit> {
        let hit = |node: NodeId| {
            let distance = self.node_pos.get(&node)?.distance_to(pos);
            (distance <= radius).then_some(NodeHit { node, distance })
        };
        let (lo, hi) = self.span(pos, radius);
        let mut hits: Vec<NodeHit> = if GridKey::volume(lo, hi) > self.node_pos.len() as u128 {
            self.node_pos.keys().copied().filter_map(hit).collect()
        } else {
            GridKey::range(lo, hi)
                .filter_map(|key| self.node_cells.get(&key))
                .flat_map(|ids| ids.iter().copied())
                .filter_map(hit)
                .collect()
        };
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.node.cmp(&b.node))
        });
        hits
    }

    /// Nearest node within `max_distance` of `pos`.
    pub fn nearest_node(&self, pos: Position, max_distance: f64) -> Option<NodeHit> {
        self.nodes_within(pos, max_distance).into_iter().next()
    }

    /// Nearest edge within `max_distance` of `pos`, ties by edge id.
    pub fn nearest_edge(&self, pos: Position, max_distance: f64) -> Option<EdgeHit> {
        let (lo, hi) = self.span(pos, max_distance);
        let mut candidates: Vec<EdgeId> = if GridKey::volume(lo, hi) > self.edge_lines.len() as u128 {
            self.edge_lines.keys().copied().collect()
        } else {
            GridKey::range(lo, hi)
                .filter_map(|key| self.edge_cells.get(&key))
                .flat_map(|ids| ids.iter().copied())
                .collect()
        };
        candidates.sort_unstable();
        candidates.dedup();

        let mut best: Option<EdgeHit> = None;
        for edge in candidates {
            let Some(hit) = self.edge_distance(edge, pos) else {
                continue;
            };
            if hit.distance > max_distance {
                continue;
            }
            let better = match &best {
                None => true,
                Some(cur) => match hit.distance.total_cmp(&cur.distance) {
                    Ordering::Less => true,
                    Ordering::Equal => hit.edge < cur.edge,
                    Ordering::Greater => false,
                },
            };
            if better {
                best = Some(hit);
            }
        }
        best
    }

    fn edge_distance(&self, edge: EdgeId, pos: Position) -> Option<EdgeHit> {
        let (line, _) = self.edge_lines.get(&edge)?;
        let first = *line.first()?;
        let mut best = EdgeHit {
            edge,
            vertex: 0,
            position: first,
            distance: pos.distance_to(first),
        };
        for (i, seg) in line.windows(2).enumerate() {
            let (distance, t) = pos.distance_to_segment(seg[0], seg[1]);
            if distance < best.distance {
                let vertex = if t < 0.5 { i } else { i + 1 };
                best = EdgeHit {
                    edge,
                    vertex,
                    position: line[vertex],
                    distance,
                };
            }
        }
        Some(best)
    }

    /// Cell box covering the cube of half-width `radius` around `pos`.
    fn span(&self, pos: Position, radius: f64) -> (GridKey, GridKey) {
        let r = if radius.is_nan() { 0.0 } else { radius.max(0.0) };
        let lo = GridKey::from_pos(pos - Position::new(r, r, r), self.cell_size);
        let hi = GridKey::from_pos(pos + Position::new(r, r, r), self.cell_size);
        (lo, hi)
    }
}
