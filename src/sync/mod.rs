//! Reconciliation of local transactions with a versioned repository.
//!
//! Local work accumulates as pending transactions. A commit pushes them
//! against the last known revision; if the repository moved on, the push is
//! refused with [`TraceError::Conflict`] and the caller pulls first. A pull
//! rewinds pending work, applies the remote transactions, then replays local
//! work that still validates and reports what had to be rolled back.
//!
//! The transport exchange never runs while the engine is borrowed: use
//! [`SyncAdapter::prepare_commit`] / [`SyncAdapter::push_ticket`] /
//! [`SyncAdapter::complete_commit`] and [`SyncAdapter::fetch`] /
//! [`SyncAdapter::integrate`] to keep editing while I/O is in flight.

mod transport;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::edit::EditEngine;
use crate::error::{Result, TraceError};
use crate::storage::Transaction;
use crate::types::TxId;

pub use transport::{InMemoryRepository, RemoteBatch, RepositoryTransport};

/// Repository version token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(pub u64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// What a pull did.
#[derive(Debug, Default)]
pub struct PullReport {
    /// Remote transactions applied, in order.
    pub applied_remote: Vec<TxId>,
    /// Remote transactions that failed local validation.
    pub remote_rejected: Vec<(TxId, TraceError)>,
    /// Pending local transactions replayed on top.
    pub replayed: Vec<TxId>,
    /// Pending local transactions that no longer validate, with the reason.
    pub rolled_back: Vec<(Transaction, TraceError)>,
    /// Revision reached.
    pub revision: Revision,
}

impl PullReport {
    /// Whether any local work was lost.
    pub fn has_rollbacks(&self) -> bool {
        !self.rolled_back.is_empty()
    }
}

/// Snapshot of pending work taken for one push.
#[derive(Clone, Debug, PartialEq)]
pub struct CommitTicket {
    /// Revision the push is based on.
    pub expected: Revision,
    /// Transactions to publish.
    pub transactions: Vec<Transaction>,
}

/// Tracks the last synced revision and the local transactions not yet
/// published.
pub struct SyncAdapter {
    transport: Arc<dyn RepositoryTransport>,
    revision: Revision,
    pending: Vec<Transaction>,
}

impl SyncAdapter {
    /// Creates an adapter that has seen nothing of the repository.
    pub fn new(transport: Arc<dyn RepositoryTransport>) -> Self {
        Self {
            transport,
            revision: Revision::default(),
            pending: Vec::new(),
        }
    }

    /// Last revision this adapter synced to.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Local transactions not yet published.
    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    fn collect(&mut self, engine: &mut EditEngine) {
        self.pending.extend(engine.drain_outbox());
    }

    /// Publishes pending work in one exchange.
    pub fn commit(&mut self, engine: &mut EditEngine) -> Result<Revision> {
        let ticket = self.prepare_commit(engine);
        let result = self.push_ticket(&ticket);
        self.complete_commit(&ticket, result)
    }

    /// Moves the engine's new transactions into pending and snapshots them.
    pub fn prepare_commit(&mut self, engine: &mut EditEngine) -> CommitTicket {
        self.collect(engine);
        CommitTicket {
            expected: self.revision,
            transactions: self.pending.clone(),
        }
    }

    /// Performs the push. Touches neither the engine nor this adapter's state.
    pub fn push_ticket(&self, ticket: &CommitTicket) -> Result<Revision> {
        if ticket.transactions.is_empty() {
            return Ok(ticket.expected);
        }
        self.transport.push(&ticket.transactions, ticket.expected)
    }

    /// Settles a push. On success the ticket's transactions leave pending;
    /// anything committed locally since the ticket was taken stays pending.
    pub fn complete_commit(&mut self, ticket: &CommitTicket, result: Result<Revision>) -> Result<Revision> {
        match result {
            Ok(revision) => {
                let published: BTreeSet<TxId> = ticket.transactions.iter().map(|t| t.id).collect();
                self.pending.retain(|t| !published.contains(&t.id));
                self.revision = revision;
                info!(%revision, published = published.len(), "commit accepted");
                Ok(revision)
            }
            Err(err) => {
                warn!(expected = %ticket.expected, error = %err, "commit refused");
                Err(err)
            }
        }
    }

    /// Fetches remote work and integrates it.
    pub fn pull(&mut self, engine: &mut EditEngine) -> Result<PullReport> {
        let batch = self.fetch()?;
        self.integrate(engine, batch)
    }

    /// Fetches everything published since the last synced revision.
    pub fn fetch(&self) -> Result<RemoteBatch> {
        self.transport.fetch(self.revision)
    }

    /// Applies a fetched batch under pending local work.
    ///
    /// Remote transactions that match a pending one by id were published by
    /// an earlier push whose reply was lost; the remote copy wins.
    pub fn integrate(&mut self, engine: &mut EditEngine, batch: RemoteBatch) -> Result<PullReport> {
        self.collect(engine);
        if batch.revision < self.revision {
            return Err(TraceError::Transport(format!(
                "fetched revision {} is behind synced revision {}",
                batch.revision, self.revision
            )));
        }
        let rebased = engine.rebase(&self.pending, &batch.transactions)?;
        self.pending = rebased.replayed;
        self.revision = batch.revision;
        let report = PullReport {
            applied_remote: rebased.applied_remote,
            remote_rejected: rebased.remote_rejected,
            replayed: self.pending.iter().map(|t| t.id).collect(),
            rolled_back: rebased.rolled_back,
            revision: batch.revision,
        };
        debug!(
            revision = %report.revision,
            applied = report.applied_remote.len(),
            replayed = report.replayed.len(),
            rolled_back = report.rolled_back.len(),
            "pull integrated"
        );
        Ok(report)
    }
}

impl fmt::Debug for SyncAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncAdapter")
            .field("revision", &self.revision)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
