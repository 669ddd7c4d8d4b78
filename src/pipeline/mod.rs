//! The per-utterance processing pipeline.
//!
//! A run flows through these stages:
//! classify → fan out one handler per intent → barrier → consolidate →
//! summarize → synthesize. The [`coordinator`] owns runs for a connection
//! and implements barge-in: a new transcript cancels the live run and the
//! next run answers every unanswered fragment at once.
//!
//! Stages never propagate collaborator errors. Each returns an explicit
//! [`Outcome`], substituting a fixed fallback when its collaborator fails,
//! so a run always produces a reply unless it is cancelled.

pub mod consolidator;
pub mod contributions;
pub mod coordinator;
pub mod handlers;
pub mod intent;
pub mod messages;
pub mod router;
pub mod run;
pub mod summarizer;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::llm::CompletionService;
use crate::store::{EventStore, RegistrationStore, RuleRetriever};
use crate::tts::Synthesizer;

/// Result of a stage that always produces a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The collaborator answered and its answer was usable.
    Success(T),
    /// The collaborator failed or answered unusably; `T` is the substitute.
    Fallback(T),
}

impl<T> Outcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Success(v) | Self::Fallback(v) => v,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Success(v) | Self::Fallback(v) => v,
        }
    }
}

/// The run was cancelled before the stage finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Await `fut` unless `cancel` fires first. Cancellation is checked before
/// the future is polled, so an already-cancelled run does no further work.
pub async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, Cancelled> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}

/// Source of the current time for past/upcoming decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// External services a run depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub completion: Arc<dyn CompletionService>,
    pub events: Arc<dyn EventStore>,
    pub registrations: Arc<dyn RegistrationStore>,
    pub rules: Arc<dyn RuleRetriever>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub clock: Arc<dyn Clock>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn outcome_accessors() {
        let ok = Outcome::Success("a");
        let fb = Outcome::Fallback("b");
        assert!(!ok.is_fallback());
        assert!(fb.is_fallback());
        assert_eq!(*fb.value(), "b");
        assert_eq!(ok.into_inner(), "a");
    }

    #[tokio::test]
    async fn cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(cancellable(&cancel, async { 1 }).await, Err(Cancelled));
    }

    #[tokio::test]
    async fn cancellable_interrupts_pending_work() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let result = cancellable(&cancel, tokio::time::sleep(Duration::from_secs(30))).await;
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn cancellable_passes_output_through() {
        let cancel = CancellationToken::new();
        assert_eq!(cancellable(&cancel, async { 7 }).await, Ok(7));
    }
}
