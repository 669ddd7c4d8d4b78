//! Event records and the search heuristics used by availability lookups.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use super::text::content_terms;
use super::{EventStore, SqliteStore};
use crate::error::Result;

/// An event as stored, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Write-up of how the event went, once it has happened.
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub organizer: String,
    #[serde(default)]
    pub contact_info: String,
    pub starts_at: DateTime<Utc>,
}

/// A stored event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub outcome: Option<String>,
    pub organizer: String,
    pub contact_info: String,
    pub starts_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.starts_at < now
    }
}

/// Time range an availability question refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateWindow {
    Today,
    Tomorrow,
    /// The next seven days.
    ThisWeek,
    /// Seven to fourteen days out.
    NextWeek,
    /// Anything before now.
    Past,
    /// Anything from now on.
    Upcoming,
}

impl DateWindow {
    /// Half-open `[start, end)` bounds relative to `now`; `None` is unbounded.
    pub fn bounds(self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let midnight = Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN));
        match self {
            Self::Today => (Some(midnight), Some(midnight + Duration::days(1))),
            Self::Tomorrow => (
                Some(midnight + Duration::days(1)),
                Some(midnight + Duration::days(2)),
            ),
            Self::ThisWeek => (Some(now), Some(now + Duration::days(7))),
            Self::NextWeek => (
                Some(now + Duration::days(7)),
                Some(now + Duration::days(14)),
            ),
            Self::Past => (None, Some(now)),
            Self::Upcoming => (Some(now), None),
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Tomorrow => "tomorrow",
            Self::ThisWeek => "this week",
            Self::NextWeek => "next week",
            Self::Past => "in the past",
            Self::Upcoming => "coming up",
        }
    }
}

const PAST_MARKERS: &[&str] = &[
    "past event",
    "past events",
    "previous",
    "last week",
    "last month",
    "last year",
    "already happened",
    "happened",
    "took place",
    "recent event",
    "recent events",
];

/// Words that describe the question rather than the event being asked about.
const EVENT_VOCABULARY: &[&str] = &[
    "event", "events", "happening", "happenings", "upcoming", "coming", "up", "soon", "next",
    "week", "weekend", "today", "tonight", "tomorrow", "past", "previous", "recent", "last",
    "month", "year", "schedule", "scheduled", "available", "availability", "join", "attend",
    "register", "sign", "want", "planned", "plans", "going", "on", "anything", "something",
    "free", "open", "date", "dates", "time", "times", "days", "day", "happened", "took", "place",
    "already", "interested", "ones", "one", "more",
];

/// A structured event search derived from a caller's phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub window: DateWindow,
    /// Substring matched against title or description.
    pub term: Option<String>,
    pub limit: usize,
}

impl EventQuery {
    /// Derive a query from free text. Explicit day or week references win,
    /// then past-tense markers; anything else searches upcoming events.
    pub fn from_phrase(phrase: &str, limit: usize) -> Self {
        let lower = phrase.to_lowercase();
        let window = if lower.contains("today") || lower.contains("tonight") {
            DateWindow::Today
        } else if lower.contains("tomorrow") {
            DateWindow::Tomorrow
        } else if lower.contains("next week") {
            DateWindow::NextWeek
        } else if lower.contains("this week") || lower.contains("weekend") {
            DateWindow::ThisWeek
        } else if PAST_MARKERS.iter().any(|m| lower.contains(m)) {
            DateWindow::Past
        } else {
            DateWindow::Upcoming
        };

        let term = content_terms(phrase)
            .into_iter()
            .find(|t| t.len() >= 3 && !EVENT_VOCABULARY.contains(&t.as_str()));

        Self {
            window,
            term,
            limit: limit.max(1),
        }
    }

    /// Same window and limit with the content filter removed.
    pub fn without_term(&self) -> Self {
        Self {
            term: None,
            ..self.clone()
        }
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    let secs: i64 = row.get(6)?;
    let starts_at = DateTime::from_timestamp(secs, 0)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(6, secs))?;
    Ok(EventRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        outcome: row.get(3)?,
        organizer: row.get(4)?,
        contact_info: row.get(5)?,
        starts_at,
    })
}

const EVENT_COLUMNS: &str = "id, title, description, outcome, organizer, contact_info, starts_at";

impl SqliteStore {
    /// Insert an event, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_event(&self, event: NewEvent) -> Result<i64> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO events (title, description, outcome, organizer, contact_info, starts_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.title,
                    event.description,
                    event.outcome,
                    event.organizer,
                    event.contact_info,
                    event.starts_at.timestamp(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Every event ordered by start time.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_events(&self) -> Result<Vec<EventRecord>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY starts_at"))?;
            let rows = stmt.query_map([], row_to_event)?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row?);
            }
            Ok(events)
        })
        .await
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn find_events(&self, query: &EventQuery, now: DateTime<Utc>) -> Result<Vec<EventRecord>> {
        let (start, end) = query.window.bounds(now);
        let start = start.map(|t| t.timestamp());
        let end = end.map(|t| t.timestamp());
        let pattern = query.term.as_ref().map(|t| format!("%{}%", t.to_lowercase()));
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let order = if query.window == DateWindow::Past {
            "DESC"
        } else {
            "ASC"
        };

        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE (?1 IS NULL OR starts_at >= ?1)
                   AND (?2 IS NULL OR starts_at < ?2)
                   AND (?3 IS NULL OR lower(title) LIKE ?3 OR lower(description) LIKE ?3)
                 ORDER BY starts_at {order}
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![start, end, pattern, limit], row_to_event)?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row?);
            }
            Ok(events)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).expect("timestamp").with_timezone(&Utc)
    }

    fn event(title: &str, starts_at: &str) -> NewEvent {
        NewEvent {
            title: title.to_owned(),
            description: format!("{title} description"),
            outcome: None,
            organizer: "Community Hub".to_owned(),
            contact_info: "hello@example.org".to_owned(),
            starts_at: at(starts_at),
        }
    }

    #[test]
    fn window_keywords() {
        assert_eq!(EventQuery::from_phrase("anything today?", 5).window, DateWindow::Today);
        assert_eq!(
            EventQuery::from_phrase("what about tomorrow", 5).window,
            DateWindow::Tomorrow
        );
        assert_eq!(
            EventQuery::from_phrase("Is there an upcoming event this week?", 5).window,
            DateWindow::ThisWeek
        );
        assert_eq!(
            EventQuery::from_phrase("events next week", 5).window,
            DateWindow::NextWeek
        );
        assert_eq!(
            EventQuery::from_phrase("what happened at previous meetups", 5).window,
            DateWindow::Past
        );
    }

    #[test]
    fn unclear_timing_defaults_to_upcoming() {
        let query = EventQuery::from_phrase("Do you have any events?", 5);
        assert_eq!(query.window, DateWindow::Upcoming);
        assert_eq!(query.term, None);
    }

    #[test]
    fn first_content_term_becomes_filter() {
        let query = EventQuery::from_phrase("Is there a hackathon coming up soon?", 3);
        assert_eq!(query.term.as_deref(), Some("hackathon"));
        assert_eq!(query.limit, 3);
    }

    #[test]
    fn this_week_bounds_are_seven_days() {
        let now = at("2026-12-08T09:00:00Z");
        let (start, end) = DateWindow::ThisWeek.bounds(now);
        assert_eq!(start, Some(now));
        assert_eq!(end, Some(at("2026-12-15T09:00:00Z")));
    }

    #[test]
    fn today_bounds_cover_whole_utc_day() {
        let (start, end) = DateWindow::Today.bounds(at("2026-12-08T17:30:00Z"));
        assert_eq!(start, Some(at("2026-12-08T00:00:00Z")));
        assert_eq!(end, Some(at("2026-12-09T00:00:00Z")));
    }

    #[tokio::test]
    async fn find_respects_window_and_order() {
        let store = SqliteStore::open_in_memory().expect("store");
        store.insert_event(event("Tech Forward Summit", "2026-11-28T09:00:00Z")).await.expect("insert");
        store.insert_event(event("Holiday Code Camp", "2026-12-12T10:00:00Z")).await.expect("insert");
        store.insert_event(event("Winter Game Jam", "2026-12-10T10:00:00Z")).await.expect("insert");
        store.insert_event(event("Future Creators Expo", "2027-01-20T10:00:00Z")).await.expect("insert");
        let now = at("2026-12-08T09:00:00Z");

        let week = store
            .find_events(&EventQuery::from_phrase("this week", 5), now)
            .await
            .expect("find");
        let titles: Vec<_> = week.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Winter Game Jam", "Holiday Code Camp"]);

        let past = store
            .find_events(&EventQuery::from_phrase("past events", 5), now)
            .await
            .expect("find");
        assert_eq!(past.len(), 1);
        assert!(past[0].is_past(now));
    }

    #[tokio::test]
    async fn term_matches_title_or_description_case_insensitively() {
        let store = SqliteStore::open_in_memory().expect("store");
        store.insert_event(event("Holiday Code Camp", "2026-12-12T10:00:00Z")).await.expect("insert");
        store.insert_event(event("Winter Game Jam", "2026-12-10T10:00:00Z")).await.expect("insert");
        let now = at("2026-12-08T09:00:00Z");

        let query = EventQuery::from_phrase("is the code camp coming up?", 5);
        assert_eq!(query.term.as_deref(), Some("code"));
        let found = store.find_events(&query, now).await.expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Holiday Code Camp");
        assert_eq!(found[0].starts_at, at("2026-12-12T10:00:00Z"));
    }

    #[tokio::test]
    async fn limit_caps_results() {
        let store = SqliteStore::open_in_memory().expect("store");
        for day in 10..16 {
            store
                .insert_event(event(&format!("Meetup {day}"), &format!("2026-12-{day}T10:00:00Z")))
                .await
                .expect("insert");
        }
        let query = EventQuery::from_phrase("any events?", 2);
        let found = store
            .find_events(&query, at("2026-12-08T09:00:00Z"))
            .await
            .expect("find");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].title, "Meetup 10");
    }
}
