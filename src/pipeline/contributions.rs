//! Partial answers produced by intent handlers, and the per-run log they
//! are appended to.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::intent::IntentCategory;

/// Whether a contribution answers something or asks the caller something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionKind {
    Information,
    /// Needs an answer from the caller; consolidation puts these first.
    PendingQuestion,
}

/// Structured event fact attached to an availability contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventFact {
    pub title: String,
    pub starts_at: DateTime<Utc>,
}

impl EventFact {
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.starts_at < now
    }
}

/// One handler's partial answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contribution {
    pub category: IntentCategory,
    pub text: String,
    pub kind: ContributionKind,
    /// The handler could not reach its collaborator and `text` is its fallback.
    pub fallback: bool,
    pub events: Vec<EventFact>,
}

impl Contribution {
    pub fn information(category: IntentCategory, text: impl Into<String>) -> Self {
        Self {
            category,
            text: text.into(),
            kind: ContributionKind::Information,
            fallback: false,
            events: Vec::new(),
        }
    }

    pub fn question(category: IntentCategory, text: impl Into<String>) -> Self {
        Self {
            kind: ContributionKind::PendingQuestion,
            ..Self::information(category, text)
        }
    }

    /// Fixed substitute text used when the handler's collaborator failed.
    pub fn fallback(category: IntentCategory, text: impl Into<String>, kind: ContributionKind) -> Self {
        Self {
            kind,
            fallback: true,
            ..Self::information(category, text)
        }
    }

    pub fn with_events(mut self, events: Vec<EventFact>) -> Self {
        self.events = events;
        self
    }

    pub fn is_question(&self) -> bool {
        self.kind == ContributionKind::PendingQuestion
    }
}

/// Append-only log shared by the handlers of one run.
///
/// Handlers may append concurrently; readers only look at it after the
/// fan-in barrier, through [`ContributionLog::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct ContributionLog {
    entries: Arc<Mutex<Vec<Contribution>>>,
}

impl ContributionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, contribution: Contribution) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(contribution);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in append order.
    pub fn snapshot(&self) -> Vec<Contribution> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_appends_are_all_kept() {
        let log = ContributionLog::new();
        let mut tasks = tokio::task::JoinSet::new();
        for category in IntentCategory::ALL {
            let log = log.clone();
            tasks.spawn(async move {
                log.append(Contribution::information(category, category.as_str()));
            });
        }
        while tasks.join_next().await.is_some() {}
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn constructors_set_kind_and_fallback() {
        let q = Contribution::question(IntentCategory::Registration, "Your email?");
        assert!(q.is_question());
        assert!(!q.fallback);

        let f = Contribution::fallback(
            IntentCategory::RuleLookup,
            "try later",
            ContributionKind::Information,
        );
        assert!(f.fallback);
        assert!(!f.is_question());
    }
}
