//! Registry of the live run per session.
//!
//! At most one run per session is live. Starting a run atomically cancels
//! and replaces the previous one, so two runs can never both believe they
//! are current. Entries are removed when the owning [`RunGuard`] drops, and
//! only if the entry still belongs to that run.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Monotonic run identifier, unique within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

struct LiveRun {
    run_id: RunId,
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

/// A run that was cancelled to make way for a newer one.
#[derive(Debug)]
pub struct PreemptedRun {
    pub run_id: RunId,
    finished: watch::Receiver<bool>,
}

impl PreemptedRun {
    /// Resolves once the preempted run has fully unwound.
    pub async fn finished(mut self) {
        let _ = self.finished.wait_for(|done| *done).await;
    }
}

/// Ownership of the live slot for one run.
///
/// Dropping the guard releases the slot (if still held) and signals anyone
/// waiting on the run to finish.
pub struct RunGuard {
    registry: Arc<SessionRegistry>,
    session_id: String,
    run_id: RunId,
    cancel: CancellationToken,
    finished: watch::Sender<bool>,
}

impl RunGuard {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether this run still owns the live slot and has not been cancelled.
    pub fn is_current(&self) -> bool {
        !self.cancel.is_cancelled() && self.registry.is_live(&self.session_id, self.run_id)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.release(&self.session_id, self.run_id);
        self.finished.send_replace(true);
    }
}

impl fmt::Debug for RunGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunGuard")
            .field("session_id", &self.session_id)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

/// Process-wide map from session id to its live run.
#[derive(Default)]
pub struct SessionRegistry {
    live: Mutex<HashMap<String, LiveRun>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new live run for `session_id`, cancelling the previous one.
    ///
    /// The previous run (if any) is returned so the caller can wait for it to
    /// unwind before the new run touches shared collaborators.
    pub fn begin(self: &Arc<Self>, session_id: &str) -> (RunGuard, Option<PreemptedRun>) {
        let run_id = RunId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let cancel = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(false);

        let previous = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            live.insert(
                session_id.to_owned(),
                LiveRun {
                    run_id,
                    cancel: cancel.clone(),
                    finished: finished_rx,
                },
            )
        };

        let preempted = previous.map(|old| {
            old.cancel.cancel();
            debug!(session = session_id, old = %old.run_id, new = %run_id, "run preempted");
            PreemptedRun {
                run_id: old.run_id,
                finished: old.finished,
            }
        });

        let guard = RunGuard {
            registry: Arc::clone(self),
            session_id: session_id.to_owned(),
            run_id,
            cancel,
            finished: finished_tx,
        };
        (guard, preempted)
    }

    /// Cancel and forget the live run for `session_id`, if any.
    pub fn cancel(&self, session_id: &str) -> Option<PreemptedRun> {
        let removed = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        removed.map(|old| {
            old.cancel.cancel();
            PreemptedRun {
                run_id: old.run_id,
                finished: old.finished,
            }
        })
    }

    /// Cancel and forget the live run for `session_id` only if it is `run_id`.
    pub fn cancel_run(&self, session_id: &str, run_id: RunId) -> Option<PreemptedRun> {
        let removed = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            if live.get(session_id).is_some_and(|r| r.run_id == run_id) {
                live.remove(session_id)
            } else {
                None
            }
        };
        removed.map(|old| {
            old.cancel.cancel();
            PreemptedRun {
                run_id: old.run_id,
                finished: old.finished,
            }
        })
    }

    pub fn is_live(&self, session_id: &str, run_id: RunId) -> bool {
        self.live_run(session_id) == Some(run_id)
    }

    pub fn live_run(&self, session_id: &str) -> Option<RunId> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map(|r| r.run_id)
    }

    /// Number of sessions with a live run.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, session_id: &str, run_id: RunId) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if live.get(session_id).is_some_and(|r| r.run_id == run_id) {
            live.remove(session_id);
        }
    }
}
