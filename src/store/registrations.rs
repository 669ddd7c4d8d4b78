//! Participant persistence for confirmed registrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use tracing::info;

use super::{RegistrationStore, SqliteStore};
use crate::error::{ParleyError, Result};
use crate::form::RegistrationForm;

/// A persisted registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantRecord {
    pub id: i64,
    /// Resolved event, when the caller's description names a stored event.
    pub event_id: Option<i64>,
    pub subject: String,
    pub fullname: String,
    pub email: String,
    pub nickname: String,
    pub event_details: String,
    pub registered_at: DateTime<Utc>,
}

fn row_to_participant(row: &Row<'_>) -> rusqlite::Result<ParticipantRecord> {
    let secs: i64 = row.get(7)?;
    let registered_at = DateTime::from_timestamp(secs, 0)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(7, secs))?;
    Ok(ParticipantRecord {
        id: row.get(0)?,
        event_id: row.get(1)?,
        subject: row.get(2)?,
        fullname: row.get(3)?,
        email: row.get(4)?,
        nickname: row.get(5)?,
        event_details: row.get(6)?,
        registered_at,
    })
}

impl SqliteStore {
    /// Registrations made under `subject`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn participants_for(&self, subject: &str) -> Result<Vec<ParticipantRecord>> {
        let subject = subject.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_id, subject, fullname, email, nickname, event_details, registered_at
                 FROM participants WHERE subject = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map([subject], row_to_participant)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl RegistrationStore for SqliteStore {
    async fn register(&self, subject: &str, form: &RegistrationForm) -> Result<ParticipantRecord> {
        if !form.is_complete() {
            return Err(ParleyError::Store(
                "refusing to persist an incomplete registration".to_owned(),
            ));
        }
        let subject = subject.to_owned();
        let form = form.clone();
        let registered_at = Utc::now();

        let record = self
            .with_conn(move |conn| {
                // Longest title contained in the caller's description wins.
                let event_id: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM events
                         WHERE instr(lower(?1), lower(title)) > 0
                         ORDER BY length(title) DESC LIMIT 1",
                        [&form.event],
                        |row| row.get(0),
                    )
                    .optional()?;
                conn.execute(
                    "INSERT INTO participants
                     (event_id, subject, fullname, email, nickname, event_details, registered_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        event_id,
                        subject,
                        form.fullname,
                        form.email,
                        form.nickname,
                        form.event,
                        registered_at.timestamp(),
                    ],
                )?;
                Ok(ParticipantRecord {
                    id: conn.last_insert_rowid(),
                    event_id,
                    subject,
                    fullname: form.fullname,
                    email: form.email,
                    nickname: form.nickname,
                    event_details: form.event,
                    registered_at,
                })
            })
            .await?;

        info!(
            participant = record.id,
            event = ?record.event_id,
            "registration persisted"
        );
        Ok(record)
    }
}
