use serde::{Deserialize, Serialize};

/// Default cap on A* node expansions per search.
pub const DEFAULT_MAX_EXPANSIONS: usize = 500_000;
/// Default intensity offset `v0` of the cost field.
pub const DEFAULT_INTENSITY_OFFSET: f64 = 0.007;
/// Default gradient weight `w` of the cost field.
pub const DEFAULT_GRADIENT_WEIGHT: f64 = 0.5;
/// Default area threshold for polyline simplification.
pub const DEFAULT_SIMPLIFY_AREA: f64 = 0.5;
/// Default sample spacing of straight-line paths.
pub const DEFAULT_STRAIGHT_STEP: f64 = 1.6;

/// How a putative path is produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    /// Minimum-cost search over the intensity field.
    #[default]
    AStar,
    /// Evenly spaced samples on the segment, ignoring the volume.
    Straight,
}

/// Lattice neighbourhood used by the search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Connectivity {
    /// Six face neighbours.
    #[default]
    Face,
    /// All 26 surrounding cells.
    Full,
}

/// Tuning knobs of the path finder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathOptions {
    /// Search strategy.
    pub mode: SearchMode,
    /// Lattice neighbourhood.
    pub connectivity: Connectivity,
    /// Expansions after which the search reports no path.
    pub max_expansions: usize,
    /// Optional cap on the accumulated path cost.
    pub max_cost: Option<f64>,
    /// Offset `v0` added to scaled intensity in the cost denominator.
    pub intensity_offset: f64,
    /// Weight `w` of the gradient magnitude in the cost numerator.
    pub gradient_weight: f64,
    /// Area threshold of Visvalingam simplification; `None` keeps every lattice point.
    pub simplify_area: Option<f64>,
    /// Sample spacing in straight mode.
    pub straight_step: f64,
    /// How many expansions run between cancellation checks.
    pub cancel_check_interval: usize,
    /// Furthest distance searched when estimating a node radius.
    pub radius_limit: f64,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::AStar,
            connectivity: Connectivity::Face,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            max_cost: None,
            intensity_offset: DEFAULT_INTENSITY_OFFSET,
            gradient_weight: DEFAULT_GRADIENT_WEIGHT,
            simplify_area: Some(DEFAULT_SIMPLIFY_AREA),
            straight_step: DEFAULT_STRAIGHT_STEP,
            cancel_check_interval: 100,
            radius_limit: 16.0,
        }
    }
}

impl PathOptions {
    /// Options producing straight-line paths.
    pub fn straight() -> Self {
        Self {
            mode: SearchMode::Straight,
            ..Self::default()
        }
    }

    /// Sets the search strategy.
    pub fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the lattice neighbourhood.
    pub fn connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Sets the expansion budget.
    pub fn max_expansions(mut self, max: usize) -> Self {
        self.max_expansions = max;
        self
    }

    /// Sets the cost budget.
    pub fn max_cost(mut self, max: Option<f64>) -> Self {
        self.max_cost = max;
        self
    }

    /// Sets the simplification threshold.
    pub fn simplify_area(mut self, area: Option<f64>) -> Self {
        self.simplify_area = area;
        self
    }

    /// Sets the cancellation polling interval.
    pub fn cancel_check_interval(mut self, every: usize) -> Self {
        self.cancel_check_interval = every;
        self
    }
}
