//! Persistent collaborators: event lookup, registration persistence and
//! rule retrieval.
//!
//! All three are traits so the pipeline can run against fakes. The
//! production implementation is a single SQLite file ([`SqliteStore`]);
//! every query runs on the blocking pool behind one connection mutex.

pub mod events;
pub mod registrations;
pub mod rules;
mod schema;
pub mod text;

pub use events::{DateWindow, EventQuery, EventRecord, NewEvent};
pub use registrations::ParticipantRecord;
pub use rules::{RankedPassage, RuleDocument};

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::{ParleyError, Result};
use crate::form::RegistrationForm;

/// Looks up events matching a query.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events inside `query`'s window relative to `now`, ordered by start time
    /// (most recent first for past windows).
    async fn find_events(&self, query: &EventQuery, now: DateTime<Utc>) -> Result<Vec<EventRecord>>;
}

/// Persists confirmed registrations.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn register(&self, subject: &str, form: &RegistrationForm) -> Result<ParticipantRecord>;
}

/// Returns the rule passages most relevant to a question.
#[async_trait]
pub trait RuleRetriever: Send + Sync {
    /// At most `top_k` passages, most relevant first, each with relevance in `0.0..=1.0`.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RankedPassage>>;
}

/// SQLite-backed implementation of every store trait.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, applying the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or database cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database, used by tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| ParleyError::Store("connection lock poisoned".to_owned()))?;
            f(&guard)
        })
        .await
        .map_err(|e| ParleyError::Store(format!("store task failed: {e}")))?
    }
}
