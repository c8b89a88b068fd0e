//! Operator actions over the graph store.
//!
//! [`EditEngine`] owns the store, the operator focus and the undo history.
//! Every mutating action runs as one store transaction; a rejected action
//! leaves the graph, the focus and the history as they were.

mod focus;
mod history;
mod review;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Result, TraceError};
use crate::events::{ChangeEvent, EventSink};
use crate::path::{
    Completed, PathFinder, PathWorker, PutativePath, RequestId, SearchOutcome, VolumeSampler,
};
use crate::spatial::GridKey;
use crate::storage::{
    default_metrics, GraphMetrics, GraphStore, ReviewProgress, StoreOptions, Transaction, TxKind,
    WriteTx,
};
use crate::types::{EdgeId, Mark, NeuronId, NodeId, NodeState, Position, TxId};

pub use focus::{Anchor, Focus};
use history::History;

/// Result of rewinding local work under remote transactions.
#[derive(Debug, Default)]
pub(crate) struct Rebased {
    pub(crate) applied_remote: Vec<TxId>,
    pub(crate) remote_rejected: Vec<(TxId, TraceError)>,
    pub(crate) replayed: Vec<Transaction>,
    pub(crate) rolled_back: Vec<(Transaction, TraceError)>,
}

/// Stateful editing session over one graph store.
pub struct EditEngine {
    store: GraphStore,
    finder: PathFinder,
    focus: Focus,
    history: History,
    outbox: Vec<Transaction>,
    sink: Arc<dyn EventSink>,
    snap_radius: f64,
    cube_size: f64,
    pending_request: Option<RequestId>,
    review_cursor: Option<NodeId>,
    cube_cursor: Option<GridKey>,
}

impl EditEngine {
    /// Opens a session with an empty store.
    pub fn new(config: &EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::with_metrics(config, sink, default_metrics())
    }

    /// Opens a session whose store reports to `metrics`.
    pub fn with_metrics(
        config: &EngineConfig,
        sink: Arc<dyn EventSink>,
        metrics: Arc<dyn GraphMetrics>,
    ) -> Self {
        let options = StoreOptions::from_config(config)
            .sink(Arc::clone(&sink))
            .metrics(metrics);
        Self {
            store: GraphStore::new(options),
            finder: PathFinder::new(config.path.clone()),
            focus: Focus::default(),
            history: History::new(config.session.history_limit),
            outbox: Vec::new(),
            sink,
            snap_radius: config.spatial.snap_radius,
            cube_size: config.review.cube_size,
            pending_request: None,
            review_cursor: None,
            cube_cursor: None,
        }
    }

    /// The graph.
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// The operator focus.
    pub fn focus(&self) -> &Focus {
        &self.focus
    }

    /// The path finder used by connect.
    pub fn finder(&self) -> &PathFinder {
        &self.finder
    }

    /// Whether an undo is available.
    pub fn can_undo(&self) -> bool {
        self.history.undo_len() > 0
    }

    /// Whether a redo is available.
    pub fn can_redo(&self) -> bool {
        self.history.redo_len() > 0
    }

    /// Transactions committed since the last drain, oldest first.
    pub fn drain_outbox(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.outbox)
    }

    /// Number of transactions waiting to be drained.
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    // ========================================================================
    // Focus
    // ========================================================================

    /// Resolves a position against the graph without changing focus.
    pub fn resolve(&self, pos: Position) -> Anchor {
        Anchor::resolve(&self.store, pos, self.snap_radius)
    }

    /// Sets the current position. Any putative path is discarded.
    pub fn pick_current(&mut self, pos: Position) -> Anchor {
        let anchor = self.resolve(pos);
        self.set_current(anchor.clone());
        anchor
    }

    /// Sets the current position to an existing node.
    pub fn pick_current_node(&mut self, node: NodeId) -> Result<Anchor> {
        let record = self.store.try_node(node)?;
        let anchor = Anchor::Node {
            node,
            position: record.position,
        };
        self.set_current(anchor.clone());
        Ok(anchor)
    }

    /// Sets the target position. Any putative path is discarded.
    pub fn pick_target(&mut self, pos: Position) -> Anchor {
        let anchor = self.resolve(pos);
        self.pending_request = None;
        self.set_focus(Focus::HasTarget {
            current: self.focus.current().cloned(),
            target: anchor.clone(),
        });
        anchor
    }

    /// Drops current, target and path.
    pub fn clear_focus(&mut self) {
        self.pending_request = None;
        self.set_focus(Focus::default());
    }

    fn set_current(&mut self, anchor: Anchor) {
        self.pending_request = None;
        let focus = match self.focus.target() {
            Some(target) => Focus::HasTarget {
                current: Some(anchor),
                target: target.clone(),
            },
            None => Focus::Idle {
                current: Some(anchor),
            },
        };
        self.set_focus(focus);
    }

    fn set_focus(&mut self, focus: Focus) {
        if focus == self.focus {
            return;
        }
        self.focus = focus;
        self.sink.publish(ChangeEvent::FocusChanged {
            current: self.focus.current().cloned(),
            target: self.focus.target().cloned(),
            has_path: self.focus.path().is_some(),
        });
    }

    /// Re-resolves focus anchors against the current graph. Anchors whose
    /// entities disappeared become free positions; the path is kept only if
    /// both anchors are unchanged.
    pub fn revalidate_focus(&mut self) {
        let focus = match &self.focus {
            Focus::Idle { current } => Focus::Idle {
                current: current.as_ref().map(|a| a.refreshed(&self.store)),
            },
            Focus::HasTarget { current, target } => Focus::HasTarget {
                current: current.as_ref().map(|a| a.refreshed(&self.store)),
                target: target.refreshed(&self.store),
            },
            Focus::HasPath {
                current,
                target,
                path,
            } => {
                let (c, t) = (current.refreshed(&self.store), target.refreshed(&self.store));
                if &c == current && &t == target {
                    Focus::HasPath {
                        current: c,
                        target: t,
                        path: path.clone(),
                    }
                } else {
                    Focus::HasTarget {
                        current: Some(c),
                        target: t,
                    }
                }
            }
        };
        self.set_focus(focus);
    }

    fn endpoints(&self) -> Result<(Anchor, Anchor)> {
        match (self.focus.current(), self.focus.target()) {
            (Some(current), Some(target)) => Ok((current.clone(), target.clone())),
            (None, _) => Err(TraceError::InvalidEdit("no current position".into())),
            (_, None) => Err(TraceError::InvalidEdit("no target position".into())),
        }
    }

    fn current_node(&self) -> Result<NodeId> {
        self.focus
            .current()
            .and_then(Anchor::node)
            .ok_or_else(|| TraceError::InvalidEdit("current position is not a node".into()))
    }

    fn target_node(&self) -> Result<NodeId> {
        self.focus
            .target()
            .and_then(Anchor::node)
            .ok_or_else(|| TraceError::InvalidEdit("target position is not a node".into()))
    }

    // ========================================================================
    // Connect
    // ========================================================================

    /// Searches a path from current to target.
    ///
    /// On success the focus holds the putative path; otherwise it keeps its
    /// anchors without a path and the outcome explains why.
    pub fn connect(&mut self, sampler: &dyn VolumeSampler) -> Result<SearchOutcome> {
        let (current, target) = self.endpoints()?;
        self.pending_request = None;
        let outcome = self
            .finder
            .find_path(current.position(), target.position(), sampler);
        self.take_outcome(current, target, &outcome);
        Ok(outcome)
    }

    /// Submits the current connect to a background worker, superseding any
    /// earlier request.
    pub fn begin_connect(&mut self, worker: &mut PathWorker) -> Result<RequestId> {
        let (current, target) = self.endpoints()?;
        let id = worker.submit(current.position(), target.position());
        self.pending_request = Some(id);
        self.set_focus(self.focus.without_path());
        debug!(request = id.0, "connect submitted");
        Ok(id)
    }

    /// Accepts a worker result. Results for anything but the latest request
    /// of this engine are reported as cancelled and leave focus alone.
    pub fn complete_connect(&mut self, done: Completed) -> SearchOutcome {
        if self.pending_request != Some(done.id) {
            debug!(request = done.id.0, "stale connect result discarded");
            return SearchOutcome::Cancelled;
        }
        self.pending_request = None;
        let Ok((current, target)) = self.endpoints() else {
            return SearchOutcome::Cancelled;
        };
        self.take_outcome(current, target, &done.outcome);
        done.outcome
    }

    fn take_outcome(&mut self, current: Anchor, target: Anchor, outcome: &SearchOutcome) {
        let focus = match outcome {
            SearchOutcome::Found(path) => Focus::HasPath {
                current,
                target,
                path: path.clone(),
            },
            SearchOutcome::NoPath | SearchOutcome::Cancelled => Focus::HasTarget {
                current: Some(current),
                target,
            },
        };
        self.set_focus(focus);
    }

    fn held_path(&self) -> Result<(Anchor, Anchor, PutativePath)> {
        match &self.focus {
            Focus::HasPath {
                current,
                target,
                path,
            } => Ok((current.clone(), target.clone(), path.clone())),
            _ => Err(TraceError::InvalidEdit("no putative path".into())),
        }
    }

    // ========================================================================
    // Topology edits
    // ========================================================================

    /// Starts a neuron whose root sits at the target position.
    pub fn create_neuron(&mut self) -> Result<(NeuronId, NodeId)> {
        let position = match self.focus.target() {
            Some(Anchor::Free(pos)) => *pos,
            Some(_) => {
                return Err(TraceError::InvalidEdit(
                    "target lies on existing structure".into(),
                ))
            }
            None => return Err(TraceError::InvalidEdit("no target position".into())),
        };
        let (neuron, root) = self.run(TxKind::CreateNeuron, |tx| tx.create_neuron(position, None))?;
        self.pending_request = None;
        self.set_focus(Focus::Idle {
            current: Some(Anchor::Node {
                node: root,
                position,
            }),
        });
        debug!(%neuron, %root, "neuron created");
        Ok((neuron, root))
    }

    /// Commits the putative path as an edge from the current node.
    ///
    /// The path ends at a new node for a free target, at the target node, or
    /// at a node split into the target edge. Returns the end node.
    pub fn extend(&mut self, sampler: &dyn VolumeSampler) -> Result<NodeId> {
        let (current, target, path) = self.held_path()?;
        let Some(start) = current.node() else {
            return Err(TraceError::InvalidEdit("extend must start at a node".into()));
        };
        let radius = self.finder.estimate_radius(sampler, target.position());
        let end = self.run(TxKind::Extend, |tx| attach(tx, start, &target, &path, radius))?;
        self.finish_path_edit(end);
        Ok(end)
    }

    /// Commits the putative path as a branch off the current node or edge
    /// sample. Returns the end node.
    pub fn branch(&mut self, sampler: &dyn VolumeSampler) -> Result<NodeId> {
        let (current, target, path) = self.held_path()?;
        if let Anchor::Node { node, .. } = &current {
            let state = self.store.try_node(*node)?.state;
            if state.is_terminal() {
                return Err(TraceError::ConflictingState {
                    node: *node,
                    state,
                    operation: "branch",
                });
            }
        }
        let radius = self.finder.estimate_radius(sampler, target.position());
        let end = self.run(TxKind::Branch, |tx| {
            let start = match &current {
                Anchor::Node { node, .. } => *node,
                Anchor::Edge { edge, sample, .. } => tx.split_edge(*edge, *sample)?,
                Anchor::Free(_) => {
                    return Err(TraceError::InvalidEdit(
                        "branch must start on existing structure".into(),
                    ))
                }
            };
            attach(tx, start, &target, &path, radius)
        })?;
        self.finish_path_edit(end);
        Ok(end)
    }

    fn finish_path_edit(&mut self, end: NodeId) {
        let current = self.store.node(end).map(|node| Anchor::Node {
            node: end,
            position: node.position,
        });
        self.set_focus(Focus::Idle { current });
    }

    /// Deletes what the focus designates.
    ///
    /// With current and target on connected nodes, every edge on the tree
    /// path between them goes. Otherwise an edge under current is deleted, or
    /// the node under current with its incident edges.
    pub fn delete(&mut self) -> Result<()> {
        let current = self
            .focus
            .current()
            .cloned()
            .ok_or_else(|| TraceError::InvalidEdit("no current position".into()))?;
        let target = self.focus.target().and_then(Anchor::node);
        match current {
            Anchor::Node { node, .. } => {
                let sub_path = target
                    .filter(|t| *t != node)
                    .and_then(|t| self.store.tree_path(node, t));
                match sub_path {
                    Some(edges) => self.run(TxKind::DeleteEdges, |tx| tx.delete_edges(&edges))?,
                    None => self.run(TxKind::DeleteNode, |tx| tx.delete_node(node))?,
                }
            }
            Anchor::Edge { edge, .. } => self.run(TxKind::DeleteEdges, |tx| tx.delete_edge(edge))?,
            Anchor::Free(_) => {
                return Err(TraceError::InvalidEdit("nothing to delete at current position".into()))
            }
        }
        self.pending_request = None;
        self.set_focus(Focus::Idle {
            current: self.focus.current().cloned(),
        });
        self.revalidate_focus();
        Ok(())
    }

    // ========================================================================
    // Annotation
    // ========================================================================

    /// Marks the current tip as traced to its end.
    pub fn end(&mut self) -> Result<()> {
        self.end_as(NodeState::End)
    }

    /// Marks the current tip with one of the terminal states.
    pub fn end_as(&mut self, state: NodeState) -> Result<()> {
        if !state.is_terminal() {
            return Err(TraceError::InvalidEdit(format!("{state} is not an end state")));
        }
        let node = self.current_node()?;
        let degree = self.store.degree(node);
        if degree > 1 {
            return Err(TraceError::InvalidStateForDegree { node, state, degree });
        }
        self.run(TxKind::Annotate, |tx| tx.set_state(node, state))
    }

    /// Resets the current node to `Normal`.
    pub fn clear_end(&mut self) -> Result<()> {
        let node = self.current_node()?;
        self.run(TxKind::Annotate, |tx| tx.set_state(node, NodeState::Normal))
    }

    /// Places `Mark1` on the current node or clears it with `Mark0`.
    pub fn mark(&mut self, mark: Mark) -> Result<()> {
        let node = self.current_node()?;
        self.run(TxKind::Mark, |tx| tx.set_mark(node, mark))
    }

    // ========================================================================
    // Review
    // ========================================================================

    /// Flags the edge under focus as examined: the edge under current, or the
    /// edge joining the current and target nodes. Returns whether it changed.
    pub fn examine(&mut self) -> Result<bool> {
        let edge = self.focused_edge()?;
        self.run(TxKind::Examine, |tx| tx.set_examined(edge, true))
    }

    fn focused_edge(&self) -> Result<EdgeId> {
        if let Some(Anchor::Edge { edge, .. }) = self.focus.current() {
            return Ok(*edge);
        }
        let (a, b) = (self.current_node()?, self.target_node()?);
        self.store
            .edge_between(a, b)
            .ok_or_else(|| TraceError::InvalidEdit(format!("no edge joins {a} and {b}")))
    }

    /// Flags every edge on the tree path from current to target node.
    /// Returns how many edges changed.
    pub fn examine_path(&mut self) -> Result<usize> {
        let (a, b) = (self.current_node()?, self.target_node()?);
        let edges = self
            .store
            .tree_path(a, b)
            .ok_or_else(|| TraceError::InvalidEdit(format!("{a} and {b} are not connected")))?;
        self.run(TxKind::Examine, |tx| {
            let mut changed = 0;
            for edge in edges {
                if tx.set_examined(edge, true)? {
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    /// Examined and total edge counts of a neuron.
    pub fn review_progress(&self, neuron: NeuronId) -> Result<ReviewProgress> {
        self.store.review_progress(neuron)
    }

    /// Whether every edge of the neuron is examined.
    pub fn is_fully_reviewed(&self, neuron: NeuronId) -> Result<bool> {
        Ok(self.store.review_progress(neuron)?.is_complete())
    }

    /// Moves current to the next unresolved node in id order.
    pub fn skip_node(&mut self) -> Option<NodeId> {
        let after = self
            .review_cursor
            .or_else(|| self.focus.current().and_then(Anchor::node));
        let next = review::next_node(&self.store, after)?;
        self.review_cursor = Some(next);
        self.move_current_to(next);
        Some(next)
    }

    /// Moves current to the first unresolved node of the next cube holding one.
    pub fn skip_cube(&mut self) -> Option<GridKey> {
        let after = self.cube_cursor.or_else(|| {
            self.focus
                .current()
                .map(|a| GridKey::from_pos(a.position(), self.cube_size))
        });
        let (cube, node) = review::next_cube(&self.store, self.cube_size, after)?;
        self.cube_cursor = Some(cube);
        self.review_cursor = Some(node);
        self.move_current_to(node);
        Some(cube)
    }

    fn move_current_to(&mut self, node: NodeId) {
        if let Some(record) = self.store.node(node) {
            self.pending_request = None;
            self.set_focus(Focus::Idle {
                current: Some(Anchor::Node {
                    node,
                    position: record.position,
                }),
            });
        }
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Reverses the most recent operator transaction. Returns its id.
    pub fn undo(&mut self) -> Result<Option<TxId>> {
        let Some(original) = self.history.pop_undo() else {
            return Ok(None);
        };
        let id = self.store.allocate_tx_id();
        let inverse = original.inverse(id, TxKind::Undo(original.id));
        if let Err(err) = self.store.replay(&inverse, "local") {
            warn!(tx = %original.id, error = %err, "undo rejected");
            self.history.push_undo(original);
            return Err(err);
        }
        debug!(tx = %original.id, undo = %id, "undone");
        let undone = original.id;
        self.history.push_redo(original);
        self.outbox.push(inverse);
        self.revalidate_focus();
        Ok(Some(undone))
    }

    /// Re-applies the most recently undone transaction. Returns its id.
    pub fn redo(&mut self) -> Result<Option<TxId>> {
        let Some(original) = self.history.pop_redo() else {
            return Ok(None);
        };
        let redo = Transaction {
            id: self.store.allocate_tx_id(),
            kind: TxKind::Redo(original.id),
            deltas: original.deltas.clone(),
        };
        if let Err(err) = self.store.replay(&redo, "local") {
            warn!(tx = %original.id, error = %err, "redo rejected");
            self.history.push_redo(original);
            return Err(err);
        }
        debug!(tx = %original.id, redo = %redo.id, "redone");
        let redone = original.id;
        self.history.push_undo(redo.clone());
        self.outbox.push(redo);
        self.revalidate_focus();
        Ok(Some(redone))
    }

    // ========================================================================
    // Sync support
    // ========================================================================

    /// Rewinds `pending` local transactions, applies `remote` on top, then
    /// replays whatever local work still validates.
    ///
    /// A pending transaction that also appears in `remote` was already
    /// published; the remote copy stands in for it.
    pub(crate) fn rebase(&mut self, pending: &[Transaction], remote: &[Transaction]) -> Result<Rebased> {
        if remote.is_empty() {
            return Ok(Rebased {
                replayed: pending.to_vec(),
                ..Rebased::default()
            });
        }
        for tx in pending.iter().rev() {
            let id = self.store.allocate_tx_id();
            let rewind = tx.inverse(id, TxKind::Rebase);
            if let Err(err) = self.store.replay(&rewind, "rebase") {
                return Err(TraceError::corruption(format!(
                    "rewinding local transaction {} failed: {err}",
                    tx.id
                )));
            }
        }
        let mut out = Rebased::default();
        let mut published = BTreeSet::new();
        for tx in remote {
            published.insert(tx.id);
            match self.store.replay(tx, "replay") {
                Ok(()) => out.applied_remote.push(tx.id),
                Err(err) => {
                    warn!(tx = %tx.id, error = %err, "remote transaction rejected");
                    out.remote_rejected.push((tx.id, err));
                }
            }
        }
        for tx in pending.iter().filter(|t| !published.contains(&t.id)) {
            match self.store.replay(tx, "replay") {
                Ok(()) => out.replayed.push(tx.clone()),
                Err(err) => {
                    warn!(tx = %tx.id, kind = %tx.kind, error = %err, "local transaction rolled back");
                    out.rolled_back.push((tx.clone(), err));
                }
            }
        }
        self.history.clear();
        self.pending_request = None;
        self.revalidate_focus();
        Ok(out)
    }

    /// Runs one operator transaction, recording it for undo and sync.
    fn run<T>(&mut self, kind: TxKind, op: impl FnOnce(&mut WriteTx<'_>) -> Result<T>) -> Result<T> {
        let mut tx = self.store.begin(kind);
        let value = match op(&mut tx) {
            Ok(value) => value,
            Err(err) => {
                tx.rollback()?;
                return Err(err);
            }
        };
        if tx.deltas().is_empty() {
            tx.rollback()?;
            return Ok(value);
        }
        let committed = tx.commit()?;
        self.history.record(committed.clone());
        self.outbox.push(committed);
        Ok(value)
    }
}

/// Adds the edge carrying `path` from `start` to the node the target designates.
fn attach(
    tx: &mut WriteTx<'_>,
    start: NodeId,
    target: &Anchor,
    path: &PutativePath,
    radius: Option<f64>,
) -> Result<NodeId> {
    let neuron = tx.store().try_node(start)?.neuron;
    let end = match target {
        Anchor::Node { node, .. } => *node,
        Anchor::Edge { edge, sample, .. } => tx.split_edge(*edge, *sample)?,
        Anchor::Free(pos) => tx.create_node(neuron, *pos, radius)?,
    };
    tx.create_edge(start, end, path.interior())?;
    Ok(end)
}

impl std::fmt::Debug for EditEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditEngine")
            .field("store", &self.store)
            .field("focus", &self.focus)
            .field("outbox", &self.outbox.len())
            .finish_non_exhaustive()
    }
}
