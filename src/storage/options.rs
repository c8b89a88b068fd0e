use std::sync::Arc;

use crate::config::EngineConfig;
use crate::events::{EventQueue, EventSink};
use crate::types::ClientId;

use super::metrics::{default_metrics, GraphMetrics};

/// Default grid cell edge length of the spatial index.
pub const DEFAULT_CELL_SIZE: f64 = 8.0;
/// Default radius given to nodes when none is estimated.
pub const DEFAULT_NODE_RADIUS: f64 = 1.0;

/// Configuration options supplied when opening a [`super::GraphStore`].
#[derive(Clone)]
pub struct StoreOptions {
    /// Tag embedded in every id this store allocates.
    pub client: ClientId,
    /// Grid cell edge length of the spatial index.
    pub cell_size: f64,
    /// Radius assigned to nodes created without an estimate.
    pub default_radius: f64,
    /// Receiver of committed change events.
    pub sink: Arc<dyn EventSink>,
    /// Metrics collection implementation.
    pub metrics: Arc<dyn GraphMetrics>,
}

impl StoreOptions {
    /// Creates options for `client` with default settings and a private event queue.
    pub fn new(client: ClientId) -> Self {
        Self {
            client,
            cell_size: DEFAULT_CELL_SIZE,
            default_radius: DEFAULT_NODE_RADIUS,
            sink: Arc::new(EventQueue::new()),
            metrics: default_metrics(),
        }
    }

    /// Derives store options from an engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(ClientId(config.session.client_id))
            .cell_size(config.spatial.cell_size)
            .default_radius(config.store.default_radius)
    }

    /// Sets the spatial grid cell size.
    pub fn cell_size(mut self, size: f64) -> Self {
        self.cell_size = size;
        self
    }

    /// Sets the fallback node radius.
    pub fn default_radius(mut self, radius: f64) -> Self {
        self.default_radius = radius;
        self
    }

    /// Sets the event sink.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn GraphMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl std::fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreOptions")
            .field("client", &self.client)
            .field("cell_size", &self.cell_size)
            .field("default_radius", &self.default_radius)
            .finish_non_exhaustive()
    }
}
