//! Background path computation.
//!
//! One search thread serves requests in order. Only the most recently
//! submitted request is live: older jobs are skipped or cancelled mid-search
//! and reported as [`SearchOutcome::Cancelled`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::types::Position;

use super::sampler::VolumeSampler;
use super::{PathFinder, SearchOutcome};

/// Identifies one submitted search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

/// A finished search.
#[derive(Clone, Debug, PartialEq)]
pub struct Completed {
    /// Request this result answers.
    pub id: RequestId,
    /// Search result.
    pub outcome: SearchOutcome,
}

struct Job {
    id: RequestId,
    start: Position,
    goal: Position,
}

/// Runs searches on a dedicated thread.
pub struct PathWorker {
    sender: Option<Sender<Job>>,
    results: Receiver<Completed>,
    latest: Arc<AtomicU64>,
    next: u64,
    thread: Option<thread::JoinHandle<()>>,
}

impl PathWorker {
    /// Starts the search thread.
    pub fn spawn(finder: PathFinder, sampler: Arc<dyn VolumeSampler>) -> Self {
        let (sender, jobs) = mpsc::channel::<Job>();
        let (done, results) = mpsc::channel::<Completed>();
        let latest = Arc::new(AtomicU64::new(0));
        let live = Arc::clone(&latest);
        let thread = thread::Builder::new()
            .name("neurotrace-path".into())
            .spawn(move || Self::search_loop(finder, sampler, jobs, done, live));
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "failed to start path worker thread");
                None
            }
        };
        Self {
            sender: Some(sender),
            results,
            latest,
            next: 0,
            thread,
        }
    }

    fn search_loop(
        finder: PathFinder,
        sampler: Arc<dyn VolumeSampler>,
        jobs: Receiver<Job>,
        done: Sender<Completed>,
        latest: Arc<AtomicU64>,
    ) {
        while let Ok(job) = jobs.recv() {
            let superseded = || latest.load(Ordering::Acquire) != job.id.0;
            let mut outcome = SearchOutcome::Cancelled;
            if !superseded() {
                outcome =
                    finder.find_path_with_cancel(job.start, job.goal, sampler.as_ref(), &superseded);
                // Stale once a newer request arrived.
                if superseded() {
                    outcome = SearchOutcome::Cancelled;
                }
            }
            debug!(request = job.id.0, found = outcome.is_found(), "path request served");
            if done.send(Completed { id: job.id, outcome }).is_err() {
                break;
            }
        }
    }

    /// Queues a search and supersedes every earlier one.
    pub fn submit(&mut self, start: Position, goal: Position) -> RequestId {
        self.next += 1;
        let id = RequestId(self.next);
        self.latest.store(id.0, Ordering::Release);
        let sent = self
            .sender
            .as_ref()
            .is_some_and(|s| s.send(Job { id, start, goal }).is_ok());
        if !sent {
            warn!(request = id.0, "path worker is not running");
        }
        id
    }

    /// The most recently submitted request, if any.
    pub fn latest(&self) -> Option<RequestId> {
        match self.latest.load(Ordering::Acquire) {
            0 => None,
            id => Some(RequestId(id)),
        }
    }

    /// Cancels every outstanding request.
    pub fn cancel_all(&mut self) {
        self.next += 1;
        self.latest.store(self.next, Ordering::Release);
    }

    /// Returns a finished result without blocking.
    pub fn try_recv(&self) -> Option<Completed> {
        match self.results.try_recv() {
            Ok(done) => Some(done),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the next finished result.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Completed> {
        match self.results.recv_timeout(timeout) {
            Ok(done) => Some(done),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the result of `id`, discarding other results.
    pub fn wait(&self, id: RequestId, timeout: Duration) -> Option<SearchOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let done = self.recv_timeout(remaining)?;
            if done.id == id {
                return Some(done.outcome);
            }
        }
    }
}

impl Drop for PathWorker {
    fn drop(&mut self) {
        self.cancel_all();
        self.sender.take();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("path worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for PathWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathWorker")
            .field("latest", &self.latest())
            .field("running", &self.thread.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::path::{DenseVolume, PathOptions, Sample};

    struct Slow(DenseVolume);

    impl VolumeSampler for Slow {
        fn sample(&self, pos: Position) -> Result<Sample> {
            thread::sleep(Duration::from_micros(200));
            self.0.sample(pos)
        }
    }

    fn lit() -> Arc<dyn VolumeSampler> {
        Arc::new(DenseVolume::from_fn(
            [12, 12, 3],
            Position::ORIGIN,
            Position::new(1.0, 1.0, 1.0),
            |_, _, _| 0.8,
        ))
    }

    #[test]
    fn latest_request_is_served() {
        let mut worker = PathWorker::spawn(PathFinder::new(PathOptions::default()), lit());
        let id = worker.submit(Position::new(1.0, 1.0, 1.0), Position::new(9.0, 9.0, 1.0));
        let outcome = worker.wait(id, Duration::from_secs(10)).unwrap();
        assert!(outcome.is_found());
        assert_eq!(worker.latest(), Some(id));
    }

    #[test]
    fn superseded_requests_report_cancelled() {
        let slow = Slow(DenseVolume::from_fn(
            [12, 12, 3],
            Position::ORIGIN,
            Position::new(1.0, 1.0, 1.0),
            |_, _, _| 0.8,
        ));
        let mut worker = PathWorker::spawn(PathFinder::new(PathOptions::default()), Arc::new(slow));
        let first = worker.submit(Position::new(1.0, 1.0, 1.0), Position::new(9.0, 9.0, 1.0));
        let second = worker.submit(Position::new(1.0, 1.0, 1.0), Position::new(5.0, 9.0, 1.0));
        let a = worker.recv_timeout(Duration::from_secs(10)).unwrap();
        let b = worker.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(a.id, first);
        assert_eq!(b.id, second);
        assert_eq!(a.outcome, SearchOutcome::Cancelled);
        assert!(b.outcome.is_found());
    }
}
