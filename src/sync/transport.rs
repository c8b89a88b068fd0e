use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, TraceError};
use crate::storage::Transaction;

use super::Revision;

/// Transactions published after some revision.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoteBatch {
    /// Repository revision the batch brings the caller to.
    pub revision: Revision,
    /// Transactions in publication order.
    pub transactions: Vec<Transaction>,
}

/// Exchange with a versioned repository.
///
/// Implementations may block on I/O. Callers never hold the graph while
/// calling into a transport.
pub trait RepositoryTransport: Send + Sync {
    /// Publishes `transactions` if the repository is still at `expected`.
    ///
    /// Returns the new revision, or [`TraceError::Conflict`] when the
    /// repository has moved on.
    fn push(&self, transactions: &[Transaction], expected: Revision) -> Result<Revision>;

    /// Everything published after `since`.
    fn fetch(&self, since: Revision) -> Result<RemoteBatch>;
}

impl<T: RepositoryTransport + ?Sized> RepositoryTransport for Arc<T> {
    fn push(&self, transactions: &[Transaction], expected: Revision) -> Result<Revision> {
        (**self).push(transactions, expected)
    }

    fn fetch(&self, since: Revision) -> Result<RemoteBatch> {
        (**self).fetch(since)
    }
}

#[derive(Default)]
struct Log {
    /// One encoded push per revision; revision `n` is `pushes[n - 1]`.
    pushes: Vec<Vec<u8>>,
    offline: bool,
}

/// Repository held in memory, shared by every clone.
///
/// Pushed transactions are stored encoded as JSON, so replay always goes
/// through a decode the way a real remote would.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    log: Arc<Mutex<Log>>,
}

impl InMemoryRepository {
    /// Creates an empty repository at revision zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current revision.
    pub fn revision(&self) -> Revision {
        Revision(self.log.lock().pushes.len() as u64)
    }

    /// Makes every request fail with a transport error while `offline`.
    pub fn set_offline(&self, offline: bool) {
        self.log.lock().offline = offline;
    }

    /// Total transactions published.
    pub fn transaction_count(&self) -> Result<usize> {
        let log = self.log.lock();
        let mut total = 0;
        for push in &log.pushes {
            total += decode(push)?.len();
        }
        Ok(total)
    }
}

impl RepositoryTransport for InMemoryRepository {
    fn push(&self, transactions: &[Transaction], expected: Revision) -> Result<Revision> {
        let mut log = self.log.lock();
        if log.offline {
            return Err(TraceError::Transport("repository unreachable".into()));
        }
        let actual = Revision(log.pushes.len() as u64);
        if actual != expected {
            return Err(TraceError::Conflict { expected, actual });
        }
        let encoded = serde_json::to_vec(transactions)?;
        log.pushes.push(encoded);
        let revision = Revision(log.pushes.len() as u64);
        debug!(%revision, count = transactions.len(), "push accepted");
        Ok(revision)
    }

    fn fetch(&self, since: Revision) -> Result<RemoteBatch> {
        let log = self.log.lock();
        if log.offline {
            return Err(TraceError::Transport("repository unreachable".into()));
        }
        let head = log.pushes.len() as u64;
        if since.0 > head {
            return Err(TraceError::Transport(format!(
                "revision {since} is ahead of repository head r{head}"
            )));
        }
        let mut transactions = Vec::new();
        for push in &log.pushes[since.0 as usize..] {
            transactions.extend(decode(push)?);
        }
        Ok(RemoteBatch {
            revision: Revision(head),
            transactions,
        })
    }
}

fn decode(bytes: &[u8]) -> Result<Vec<Transaction>> {
    Ok(serde_json::from_slice(bytes)?)
}

impl std::fmt::Debug for InMemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("revision", &self.revision())
            .finish()
    }
}
