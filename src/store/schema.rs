//! SQLite DDL for the event, participant and rule store.

use rusqlite::Connection;

/// Current schema version, recorded in `schema_meta`.
pub(crate) const SCHEMA_VERSION: u32 = 1;

/// Complete DDL. Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Happenings offered to callers.
CREATE TABLE IF NOT EXISTS events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    title        TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    outcome      TEXT,                -- write-up once the event has happened
    organizer    TEXT NOT NULL DEFAULT '',
    contact_info TEXT NOT NULL DEFAULT '',
    starts_at    INTEGER NOT NULL     -- unix seconds, UTC
);

CREATE INDEX IF NOT EXISTS idx_events_starts_at ON events(starts_at);

-- Confirmed registrations.
CREATE TABLE IF NOT EXISTS participants (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id      INTEGER REFERENCES events(id) ON DELETE SET NULL,
    subject       TEXT NOT NULL,      -- token subject of the caller
    fullname      TEXT NOT NULL,
    email         TEXT NOT NULL,
    nickname      TEXT NOT NULL,
    event_details TEXT NOT NULL,      -- event as the caller described it
    registered_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_participants_subject ON participants(subject);

-- Question/answer passages used for rule lookups.
CREATE TABLE IF NOT EXISTS rule_documents (
    id       TEXT PRIMARY KEY,
    question TEXT NOT NULL,
    answer   TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT ''
);
"#;

/// Apply the DDL and stamp the schema version.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn schema_applies_twice() {
        let conn = Connection::open_in_memory().expect("open");
        apply_schema(&conn).expect("first");
        apply_schema(&conn).expect("second");

        let version: String = conn
            .query_row(
                "SELECT value FROM schema_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .expect("version row");
        assert_eq!(version, SCHEMA_VERSION.to_string());
    }
}
