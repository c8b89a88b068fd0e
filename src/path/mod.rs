//! Putative path computation through an intensity volume.
//!
//! The finder is a pure function of its inputs: the same endpoints, sampler
//! contents and options always produce the same path. Searches are bounded by
//! an expansion budget and an optional cost budget, and poll a cancellation
//! callback while they run.

mod astar;
mod options;
mod sampler;
mod simplify;
mod worker;

use tracing::debug;

use crate::types::Position;

pub use astar::SearchStats;
pub use options::{
    Connectivity, PathOptions, SearchMode, DEFAULT_GRADIENT_WEIGHT, DEFAULT_INTENSITY_OFFSET,
    DEFAULT_MAX_EXPANSIONS, DEFAULT_SIMPLIFY_AREA, DEFAULT_STRAIGHT_STEP,
};
pub use sampler::{DenseVolume, Sample, VolumeSampler};
pub use simplify::simplify;
pub use worker::{Completed, PathWorker, RequestId};

/// A computed path that has not been committed to the graph.
#[derive(Clone, Debug, PartialEq)]
pub struct PutativePath {
    /// Ordered points from start to goal, both included.
    pub points: Vec<Position>,
    /// Accumulated cost under the search's cost field.
    pub cost: f64,
}

impl PutativePath {
    /// First point.
    pub fn start(&self) -> Option<Position> {
        self.points.first().copied()
    }

    /// Last point.
    pub fn goal(&self) -> Option<Position> {
        self.points.last().copied()
    }

    /// Points strictly between start and goal; these become an edge's samples.
    pub fn interior(&self) -> Vec<Position> {
        if self.points.len() <= 2 {
            return Vec::new();
        }
        self.points[1..self.points.len() - 1].to_vec()
    }

    /// Polyline length.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| w[0].distance_to(w[1]))
            .sum()
    }
}

/// Result of one search.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchOutcome {
    /// A path was found.
    Found(PutativePath),
    /// The goal is unreachable within the sampled region and budgets.
    NoPath,
    /// The search was cancelled or superseded.
    Cancelled,
}

impl SearchOutcome {
    /// The path, if one was found.
    pub fn path(&self) -> Option<&PutativePath> {
        match self {
            SearchOutcome::Found(path) => Some(path),
            _ => None,
        }
    }

    /// Whether a path was found.
    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found(_))
    }

    fn label(&self) -> &'static str {
        match self {
            SearchOutcome::Found(_) => "found",
            SearchOutcome::NoPath => "no-path",
            SearchOutcome::Cancelled => "cancelled",
        }
    }
}

/// Computes putative paths with fixed options.
#[derive(Clone, Debug, Default)]
pub struct PathFinder {
    options: PathOptions,
}

impl PathFinder {
    /// Creates a finder.
    pub fn new(options: PathOptions) -> Self {
        Self { options }
    }

    /// The finder's options.
    pub fn options(&self) -> &PathOptions {
        &self.options
    }

    /// Finds a path from `start` to `goal`.
    pub fn find_path(&self, start: Position, goal: Position, sampler: &dyn VolumeSampler) -> SearchOutcome {
        self.find_path_with_cancel(start, goal, sampler, &|| false)
    }

    /// Finds a path, polling `cancel` between batches of expansions.
    pub fn find_path_with_cancel(
        &self,
        start: Position,
        goal: Position,
        sampler: &dyn VolumeSampler,
        cancel: &dyn Fn() -> bool,
    ) -> SearchOutcome {
        if start.distance_to(goal) <= f64::EPSILON {
            return SearchOutcome::NoPath;
        }
        let (outcome, stats) = match self.options.mode {
            SearchMode::Straight => (self.straight(start, goal), SearchStats::default()),
            SearchMode::AStar => {
                let (outcome, stats) = astar::search(start, goal, sampler, &self.options, cancel);
                let outcome = match (outcome, self.options.simplify_area) {
                    (SearchOutcome::Found(path), Some(area)) => SearchOutcome::Found(PutativePath {
                        points: simplify(&path.points, area),
                        cost: path.cost,
                    }),
                    (other, _) => other,
                };
                (outcome, stats)
            }
        };
        debug!(
            %start,
            %goal,
            outcome = outcome.label(),
            expansions = stats.expansions,
            sampled = stats.sampled,
            "path search finished"
        );
        outcome
    }

    fn straight(&self, start: Position, goal: Position) -> SearchOutcome {
        let length = start.distance_to(goal);
        let steps = ((length / self.options.straight_step) + 0.6).round().max(1.0) as usize;
        let points = (0..=steps)
            .map(|k| {
                if k == steps {
                    goal
                } else {
                    start.lerp(goal, k as f64 / steps as f64)
                }
            })
            .collect();
        SearchOutcome::Found(PutativePath {
            points,
            cost: length,
        })
    }

    /// Estimates the process radius at `center`.
    ///
    /// Marches outward along the six axis directions until intensity falls
    /// below half the centre value or leaves the volume, and averages the
    /// distances. Returns `None` where the centre is dark or unsampled.
    pub fn estimate_radius(&self, sampler: &dyn VolumeSampler, center: Position) -> Option<f64> {
        let peak = sampler.sample(center).ok()?.intensity;
        if peak <= 0.0 {
            return None;
        }
        let spacing = sampler.spacing();
        let step = (spacing.x.min(spacing.y).min(spacing.z) / 2.0).max(1e-3);
        let limit = self.options.radius_limit;
        let directions = [
            Position::new(1.0, 0.0, 0.0),
            Position::new(-1.0, 0.0, 0.0),
            Position::new(0.0, 1.0, 0.0),
            Position::new(0.0, -1.0, 0.0),
            Position::new(0.0, 0.0, 1.0),
            Position::new(0.0, 0.0, -1.0),
        ];
        let mut total = 0.0;
        for dir in directions {
            let mut r = step;
            while r < limit {
                match sampler.sample(center + dir * r) {
                    Ok(s) if s.intensity >= peak / 2.0 => r += step,
                    _ => break,
                }
            }
            total += r.min(limit);
        }
        Some(total / directions.len() as f64)
    }
}
