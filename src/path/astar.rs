//! Best-first search over a lattice anchored at the start position.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::types::Position;

use super::options::{Connectivity, PathOptions};
use super::sampler::VolumeSampler;
use super::{PutativePath, SearchOutcome};

type Cell = [i64; 3];

const FACE: [Cell; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

/// Open-set entry; the heap pops the lowest `f`, then the lexicographically smallest cell.
#[derive(Clone, Copy, Debug)]
struct Frontier {
    f: f64,
    g: f64,
    cell: Cell,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed on both keys: BinaryHeap is a max-heap.
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

struct Record {
    g: f64,
    parent: Option<Cell>,
    closed: bool,
}

/// Search statistics, reported with the outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Cells expanded.
    pub expansions: usize,
    /// Distinct cells whose cost was sampled.
    pub sampled: usize,
}

struct Lattice<'a> {
    origin: Position,
    spacing: Position,
    sampler: &'a dyn VolumeSampler,
    options: &'a PathOptions,
    costs: FxHashMap<Cell, Option<f64>>,
}

impl Lattice<'_> {
    fn position(&self, cell: Cell) -> Position {
        self.origin
            + Position::new(
                cell[0] as f64 * self.spacing.x,
                cell[1] as f64 * self.spacing.y,
                cell[2] as f64 * self.spacing.z,
            )
    }

    fn cell_of(&self, pos: Position) -> Cell {
        let rel = pos - self.origin;
        [
            (rel.x / self.spacing.x).round() as i64,
            (rel.y / self.spacing.y).round() as i64,
            (rel.z / self.spacing.z).round() as i64,
        ]
    }

    /// Per-sample cost, `None` where the volume cannot be sampled.
    fn cost(&mut self, cell: Cell) -> Option<f64> {
        if let Some(cached) = self.costs.get(&cell) {
            return *cached;
        }
        let value = self.sampler.sample(self.position(cell)).ok().map(|s| {
            let intensity = s.intensity.clamp(0.0, 1.0);
            (1.0 + self.options.gradient_weight * s.gradient.norm())
                / (255.0 * intensity + self.options.intensity_offset)
        });
        self.costs.insert(cell, value);
        value
    }

    fn step_length(&self, offset: Cell) -> f64 {
        Position::new(
            offset[0] as f64 * self.spacing.x,
            offset[1] as f64 * self.spacing.y,
            offset[2] as f64 * self.spacing.z,
        )
        .norm()
    }

    fn heuristic(&self, cell: Cell, goal: Position) -> f64 {
        self.position(cell).distance_to(goal) / (255.0 + self.options.intensity_offset)
    }
}

fn offsets(connectivity: Connectivity) -> Vec<Cell> {
    match connectivity {
        Connectivity::Face => FACE.to_vec(),
        Connectivity::Full => {
            let mut out = Vec::with_capacity(26);
            for dx in -1..=1 {
                for dy in -1..=1 {
                    for dz in -1..=1 {
                        if (dx, dy, dz) != (0, 0, 0) {
                            out.push([dx, dy, dz]);
                        }
                    }
                }
            }
            out
        }
    }
}

/// Minimum-cost lattice path from `start` to `goal`.
///
/// The returned points begin at `start` and end at `goal` exactly; interior
/// points are lattice positions.
pub(crate) fn search(
    start: Position,
    goal: Position,
    sampler: &dyn VolumeSampler,
    options: &PathOptions,
    cancel: &dyn Fn() -> bool,
) -> (SearchOutcome, SearchStats) {
    let raw = sampler.spacing();
    let spacing = Position::new(
        if raw.x > 0.0 { raw.x } else { 1.0 },
        if raw.y > 0.0 { raw.y } else { 1.0 },
        if raw.z > 0.0 { raw.z } else { 1.0 },
    );
    let mut lattice = Lattice {
        origin: start,
        spacing,
        sampler,
        options,
        costs: FxHashMap::default(),
    };
    let mut stats = SearchStats::default();
    let origin: Cell = [0, 0, 0];
    let target = lattice.cell_of(goal);
    let target_pos = lattice.position(target);
    if lattice.cost(origin).is_none() || lattice.cost(target).is_none() {
        stats.sampled = lattice.costs.len();
        return (SearchOutcome::NoPath, stats);
    }

    let neighbourhood = offsets(options.connectivity);
    let interval = options.cancel_check_interval.max(1);
    let mut records: FxHashMap<Cell, Record> = FxHashMap::default();
    let mut open = BinaryHeap::new();
    records.insert(
        origin,
        Record {
            g: 0.0,
            parent: None,
            closed: false,
        },
    );
    open.push(Frontier {
        f: lattice.heuristic(origin, target_pos),
        g: 0.0,
        cell: origin,
    });

    let outcome = loop {
        let Some(entry) = open.pop() else {
            break SearchOutcome::NoPath;
        };
        let Some(record) = records.get_mut(&entry.cell) else {
            continue;
        };
        if record.closed || entry.g > record.g {
            continue;
        }
        record.closed = true;
        stats.expansions += 1;
        if stats.expansions % interval == 0 && cancel() {
            break SearchOutcome::Cancelled;
        }
        if stats.expansions > options.max_expansions {
            trace!(expansions = stats.expansions, "expansion budget exhausted");
            break SearchOutcome::NoPath;
        }
        if options.max_cost.is_some_and(|max| entry.f > max) {
            trace!(cost = entry.f, "cost budget exhausted");
            break SearchOutcome::NoPath;
        }
        if entry.cell == target {
            let mut cells = vec![entry.cell];
            let mut at = entry.cell;
            while let Some(parent) = records.get(&at).and_then(|r| r.parent) {
                cells.push(parent);
                at = parent;
            }
            cells.reverse();
            let mut points: Vec<Position> = cells.iter().map(|c| lattice.position(*c)).collect();
            if points.len() == 1 {
                points.push(goal);
            } else if let Some(last) = points.last_mut() {
                *last = goal;
            }
            break SearchOutcome::Found(PutativePath {
                points,
                cost: entry.g,
            });
        }

        let Some(here) = lattice.cost(entry.cell) else {
            continue;
        };
        for offset in &neighbourhood {
            let next = [
                entry.cell[0] + offset[0],
                entry.cell[1] + offset[1],
                entry.cell[2] + offset[2],
            ];
            if records.get(&next).is_some_and(|r| r.closed) {
                continue;
            }
            let Some(there) = lattice.cost(next) else {
                continue;
            };
            let tentative = entry.g + lattice.step_length(*offset) * (here + there) / 2.0;
            let improves = records.get(&next).map_or(true, |r| tentative < r.g);
            if improves {
                records.insert(
                    next,
                    Record {
                        g: tentative,
                        parent: Some(entry.cell),
                        closed: false,
                    },
                );
                open.push(Frontier {
                    f: tentative + lattice.heuristic(next, target_pos),
                    g: tentative,
                    cell: next,
                });
            }
        }
    };
    stats.sampled = lattice.costs.len();
    (outcome, stats)
}
