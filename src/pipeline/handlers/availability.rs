//! Availability: which events are on, and when.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{HandlerOutput, HandlerRequest};
use crate::pipeline::contributions::{Contribution, ContributionKind, EventFact};
use crate::pipeline::intent::IntentCategory;
use crate::pipeline::{Cancelled, cancellable};
use crate::store::{EventQuery, EventRecord, EventStore};

pub(super) const FALLBACK_TEXT: &str = "I'm having a technical issue checking the event schedule right now. What days and times work best for you?";

pub(super) fn fallback() -> Contribution {
    Contribution::fallback(
        IntentCategory::Availability,
        FALLBACK_TEXT,
        ContributionKind::PendingQuestion,
    )
}

#[derive(Clone)]
pub struct AvailabilityHandler {
    events: Arc<dyn EventStore>,
    max_events: usize,
}

/// Spoken date, e.g. `Saturday, December 12, 2026 at 10:00 UTC`.
pub fn spoken_date(at: DateTime<Utc>) -> String {
    at.format("%A, %B %-d, %Y at %H:%M UTC").to_string()
}

fn describe_event(event: &EventRecord, now: DateTime<Utc>) -> String {
    let when = spoken_date(event.starts_at);
    if event.is_past(now) {
        let mut line = format!("{} already took place on {when}.", event.title);
        if let Some(outcome) = event.outcome.as_deref().filter(|o| !o.trim().is_empty()) {
            line.push_str(&format!(" How it went: {}", outcome.trim()));
        }
        return line;
    }
    let mut line = format!("{} is on {when}.", event.title);
    if !event.description.trim().is_empty() {
        line.push_str(&format!(" {}", event.description.trim()));
        if !line.ends_with('.') {
            line.push('.');
        }
    }
    if !event.organizer.trim().is_empty() {
        line.push_str(&format!(" Organised by {}", event.organizer.trim()));
        if !event.contact_info.trim().is_empty() {
            line.push_str(&format!(", contact {}", event.contact_info.trim()));
        }
        line.push('.');
    }
    line
}

/// Render search results. `relaxed` means the content filter matched nothing
/// and `events` are the unfiltered results for the same window.
pub fn describe_events(
    events: &[EventRecord],
    query: &EventQuery,
    relaxed: bool,
    now: DateTime<Utc>,
) -> String {
    let window = query.window.describe();
    if events.is_empty() {
        return match &query.term {
            Some(term) => format!("I couldn't find any events about \"{term}\" {window}."),
            None => format!("I couldn't find any events {window}."),
        };
    }
    let mut text = match (&query.term, relaxed) {
        (Some(term), true) => {
            format!("Nothing matched \"{term}\", but here is what I found {window}:")
        }
        _ => format!("Here is what I found {window}:"),
    };
    for event in events {
        text.push(' ');
        text.push_str(&describe_event(event, now));
    }
    text
}

impl AvailabilityHandler {
    pub fn new(events: Arc<dyn EventStore>, max_events: usize) -> Self {
        Self {
            events,
            max_events: max_events.max(1),
        }
    }

    pub(super) async fn handle(
        &self,
        request: &HandlerRequest,
        cancel: &CancellationToken,
    ) -> Result<HandlerOutput, Cancelled> {
        let phrase = request.joined_phrases();
        let now = request.context.now;
        let query = EventQuery::from_phrase(&phrase, self.max_events);
        debug!(?query, "availability lookup");

        let mut relaxed = false;
        let mut found = cancellable(cancel, self.events.find_events(&query, now)).await?;
        if matches!(&found, Ok(events) if events.is_empty()) && query.term.is_some() {
            relaxed = true;
            found = cancellable(cancel, self.events.find_events(&query.without_term(), now)).await?;
        }

        let contribution = match found {
            Ok(events) => {
                let facts = events
                    .iter()
                    .map(|e| EventFact {
                        title: e.title.clone(),
                        starts_at: e.starts_at,
                    })
                    .collect();
                Contribution::information(
                    IntentCategory::Availability,
                    describe_events(&events, &query, relaxed, now),
                )
                .with_events(facts)
            }
            Err(e) => {
                warn!("event lookup failed: {e}");
                fallback()
            }
        };
        Ok(HandlerOutput::contribution(contribution))
    }
}
