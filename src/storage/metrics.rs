use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking graph store operations.
///
/// The store calls these hooks once per applied delta and once per transaction
/// outcome. Implementations must be cheap; they run inside the commit path.
pub trait GraphMetrics: Send + Sync {
    /// Records a node entering the graph.
    fn node_created(&self);

    /// Records a node leaving the graph.
    fn node_deleted(&self);

    /// Records an edge entering the graph.
    fn edge_created(&self);

    /// Records an edge leaving the graph.
    fn edge_deleted(&self);

    /// Records a neuron being split into several after a delete.
    fn neuron_split(&self);

    /// Records a transaction outcome.
    ///
    /// # Parameters
    /// * `origin` - `"local"` for operator edits including undo and redo,
    ///   `"replay"` for remote and replayed work, `"rebase"` for rewinds during a pull.
    /// * `committed` - Whether validation accepted the transaction.
    fn transaction(&self, origin: &'static str, committed: bool);
}

/// A no-op implementation of [`GraphMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl GraphMetrics for NoopMetrics {
    fn node_created(&self) {}
    fn node_deleted(&self) {}
    fn edge_created(&self) {}
    fn edge_deleted(&self) {}
    fn neuron_split(&self) {}
    fn transaction(&self, _origin: &'static str, _committed: bool) {}
}

/// A thread-safe counter-based implementation of [`GraphMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of nodes created.
    pub nodes_created: AtomicU64,

    /// Number of nodes deleted.
    pub nodes_deleted: AtomicU64,

    /// Number of edges created.
    pub edges_created: AtomicU64,

    /// Number of edges deleted.
    pub edges_deleted: AtomicU64,

    /// Number of neuron splits.
    pub neuron_splits: AtomicU64,

    /// Number of local transactions committed.
    pub local_commits: AtomicU64,

    /// Number of local transactions rejected by validation.
    pub local_rejects: AtomicU64,

    /// Number of replayed transactions committed.
    pub replay_commits: AtomicU64,

    /// Number of replayed transactions rejected by validation.
    pub replay_rejects: AtomicU64,
}

impl GraphMetrics for CounterMetrics {
    fn node_created(&self) {
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    fn node_deleted(&self) {
        self.nodes_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_created(&self) {
        self.edges_created.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_deleted(&self) {
        self.edges_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn neuron_split(&self) {
        self.neuron_splits.fetch_add(1, Ordering::Relaxed);
    }

    fn transaction(&self, origin: &'static str, committed: bool) {
        let counter = match (origin, committed) {
            ("local", true) => &self.local_commits,
            ("local", false) => &self.local_rejects,
            (_, true) => &self.replay_commits,
            (_, false) => &self.replay_rejects,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
pub fn default_metrics() -> Arc<dyn GraphMetrics> {
    Arc::new(NoopMetrics)
}
