//! Ordered change notifications for presentation and sync consumers.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::edit::Anchor;
use crate::storage::TxKind;
use crate::types::{EdgeId, NeuronId, NodeId, TxId};

/// One observable change.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    /// A node was created or restored.
    NodeAdded(NodeId),
    /// A node was removed.
    NodeRemoved(NodeId),
    /// A node's annotation or owning neuron changed.
    NodeUpdated(NodeId),
    /// An edge was created or restored.
    EdgeAdded(EdgeId),
    /// An edge was removed.
    EdgeRemoved(EdgeId),
    /// An edge's examined flag or owning neuron changed.
    EdgeUpdated(EdgeId),
    /// A neuron was created.
    NeuronAdded(NeuronId),
    /// A neuron was destroyed.
    NeuronRemoved(NeuronId),
    /// A neuron was re-rooted.
    NeuronUpdated(NeuronId),
    /// A transaction finished applying; all its entity events precede this one.
    Committed {
        /// Transaction id.
        tx: TxId,
        /// What the transaction did.
        kind: TxKind,
    },
    /// The operator focus moved.
    FocusChanged {
        /// Current position, if any.
        current: Option<Anchor>,
        /// Target position, if any.
        target: Option<Anchor>,
        /// Whether a putative path is held.
        has_path: bool,
    },
}

/// Receiver of change events.
///
/// Implementations must queue rather than drop: the engine publishes
/// synchronously and makes no assumption about consumption latency.
pub trait EventSink: Send + Sync {
    /// Accepts one event.
    fn publish(&self, event: ChangeEvent);
}

/// Unbounded FIFO sink; clones share the same queue.
#[derive(Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<VecDeque<ChangeEvent>>>,
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every queued event in publication order.
    pub fn drain(&self) -> Vec<ChangeEvent> {
        self.inner.lock().drain(..).collect()
    }

    /// Removes and returns the oldest event.
    pub fn pop(&self) -> Option<ChangeEvent> {
        self.inner.lock().pop_front()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl EventSink for EventQueue {
    fn publish(&self, event: ChangeEvent) {
        self.inner.lock().push_back(event);
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len())
            .finish()
    }
}
