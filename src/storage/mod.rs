//! Graph storage: entity records, deltas, transactions and the store itself.

mod delta;
mod graph;
mod metrics;
mod options;
mod types;

/// Deltas and the transactions that group them.
pub use delta::{Delta, Transaction, TxKind};

/// The store and its write transaction handle.
pub use graph::{GraphSnapshot, GraphStore, TxState, WriteTx};

/// Metrics collection hooks.
pub use metrics::{default_metrics, CounterMetrics, GraphMetrics, NoopMetrics};

/// Store configuration.
pub use options::{StoreOptions, DEFAULT_CELL_SIZE, DEFAULT_NODE_RADIUS};

/// Entity records.
pub use types::{Annotation, Edge, Neuron, Node, ReviewProgress};
