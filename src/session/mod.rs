//! Per-caller conversational state.
//!
//! A [`Session`] outlives individual connections: it is keyed by the token
//! subject, so a caller who reconnects keeps their summary, form and
//! history. Runs never hold the session lock while they work; they read a
//! [`SessionSnapshot`] at start and the coordinator applies their results
//! under the lock once delivery finishes.

pub mod registry;

pub use registry::{PreemptedRun, RunGuard, RunId, SessionRegistry};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::AuthUser;
use crate::form::RegistrationForm;

/// Speaker of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// One entry of the message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Read-only copy of the session state a run starts from.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub summary: String,
    pub form: RegistrationForm,
    pub history: Vec<ChatTurn>,
}

/// Mutable state for one caller.
#[derive(Debug)]
pub struct Session {
    id: String,
    /// Transcripts not yet answered by a completed run.
    fragments: Vec<String>,
    summary: String,
    form: RegistrationForm,
    history: VecDeque<ChatTurn>,
    history_limit: usize,
}

impl Session {
    pub fn new(id: impl Into<String>, form: RegistrationForm, history_limit: usize) -> Self {
        Self {
            id: id.into(),
            fragments: Vec::new(),
            summary: String::new(),
            form,
            history: VecDeque::new(),
            history_limit: history_limit.max(2),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn push_fragment(&mut self, text: impl Into<String>) {
        self.fragments.push(text.into());
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// Every unanswered fragment, oldest first, joined by single spaces.
    pub fn combined_input(&self) -> String {
        self.fragments.join(" ")
    }

    /// Drop the `count` oldest fragments. Fragments that arrived after the
    /// run started are kept.
    pub fn drain_fragments(&mut self, count: usize) {
        let count = count.min(self.fragments.len());
        self.fragments.drain(..count);
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = summary.into();
    }

    pub fn form(&self) -> &RegistrationForm {
        &self.form
    }

    pub fn set_form(&mut self, form: RegistrationForm) {
        self.form = form;
    }

    pub fn history(&self) -> impl Iterator<Item = &ChatTurn> {
        self.history.iter()
    }

    /// Append a user/assistant exchange, evicting the oldest entries past the limit.
    pub fn record_turn(&mut self, user: &str, assistant: &str) {
        self.history.push_back(ChatTurn::user(user));
        self.history.push_back(ChatTurn::assistant(assistant));
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            summary: self.summary.clone(),
            form: self.form.clone(),
            history: self.history.iter().cloned().collect(),
        }
    }
}

/// Process-wide map of sessions keyed by token subject.
#[derive(Debug)]
pub struct SessionStore {
    sessions: std::sync::Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    history_limit: usize,
}

impl SessionStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            sessions: std::sync::Mutex::new(HashMap::new()),
            history_limit,
        }
    }

    /// Existing session for `user`, or a new one seeded from the token claims.
    pub fn open(&self, user: &AuthUser) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(user.subject.clone()).or_insert_with(|| {
            debug!(subject = %user.subject, "creating session");
            Arc::new(Mutex::new(Session::new(
                user.subject.clone(),
                user.seeded_form(),
                self.history_limit,
            )))
        }))
    }

    pub fn get(&self, subject: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
