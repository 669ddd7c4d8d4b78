//! Merges handler contributions into the single spoken reply.
//!
//! The merge itself is a completion call. Its answer is checked against the
//! event facts the handlers attached: a reply that invites the caller to an
//! event dated before `now` is replaced by a deterministic composition of
//! the contributions with the offending sentences removed.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::contributions::Contribution;
use super::handlers::availability::spoken_date;
use super::router::FanIn;
use super::{Cancelled, Outcome, cancellable};
use crate::llm::{CompletionService, Prompt};
use crate::store::text::tokenize;

/// Reply when there is nothing to merge.
pub const NEUTRAL_ACK: &str = "Got it, thanks for sharing.";

/// Reply when the merge step itself failed.
pub const APOLOGY: &str =
    "Sorry, I'm having trouble consolidating the messages right now. Please try again later.";

const SYSTEM_PROMPT: &str = "\
You merge the findings of several assistants into one short spoken reply to a caller.
Rules:
- Use only facts stated in the findings. Never add events, dates, prices or rules.
- Findings marked QUESTION come first in your reply.
- Events marked PAST already happened: describe them in the past tense and never invite the caller to them.
- No lists, no markdown, at most five sentences.";

/// Words and phrases that invite or encourage someone to attend.
const INVITE_MARKERS: &[&str] = &[
    "join",
    "joining",
    "sign up",
    "register",
    "attend",
    "come",
    "don't miss",
    "see you",
    "invite",
    "reserve",
    "save your spot",
    "would you like",
];

/// Split `text` into sentences, keeping terminal punctuation.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        let boundary = matches!(ch, '.' | '!' | '?')
            && chars.peek().is_none_or(|(_, next)| next.is_whitespace());
        if boundary {
            let end = idx + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Wording that presents an event as still ahead.
const FUTURE_MARKERS: &[&str] = &[
    "coming up",
    "upcoming",
    "will be",
    "will take place",
    "will happen",
    "is happening",
    "is on",
    "starts",
    "soon",
    "this week",
    "next week",
    "tomorrow",
];

/// Words that point back at the event named in an earlier sentence.
const BACK_REFERENCES: &[&str] = &["it", "this", "that", "there", "them", "the event"];

fn has_any(sentence: &str, markers: &[&str]) -> bool {
    let padded = format!(" {} ", tokenize(sentence).join(" "));
    markers
        .iter()
        .any(|marker| padded.contains(&format!(" {marker} ")))
}

fn has_invite_marker(sentence: &str) -> bool {
    has_any(sentence, INVITE_MARKERS)
}

fn names_any(lower_sentence: &str, titles: &[String]) -> bool {
    titles
        .iter()
        .any(|title| lower_sentence.contains(&title.to_lowercase()))
}

/// Event titles cited by the handlers, split by whether they already happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PastEventGuard {
    pub past: Vec<String>,
    pub upcoming: Vec<String>,
}

impl PastEventGuard {
    pub fn new(past: Vec<String>, upcoming: Vec<String>) -> Self {
        Self { past, upcoming }
    }

    pub fn from_contributions(contributions: &[Contribution], now: DateTime<Utc>) -> Self {
        let mut guard = Self::default();
        for fact in contributions.iter().flat_map(|c| &c.events) {
            let bucket = if fact.is_past(now) {
                &mut guard.past
            } else {
                &mut guard.upcoming
            };
            if !bucket.contains(&fact.title) {
                bucket.push(fact.title.clone());
            }
        }
        guard
    }

    /// One flag per sentence: true when the sentence presents a past event
    /// as upcoming, invites the caller to it by name, or invites the caller
    /// to "it" right after a past event was the last one named.
    fn offending(&self, sentences: &[&str]) -> Vec<bool> {
        let mut last_named_past = false;
        sentences
            .iter()
            .map(|sentence| {
                let lower = sentence.to_lowercase();
                let names_past = names_any(&lower, &self.past);
                let names_upcoming = names_any(&lower, &self.upcoming);
                let invites = has_invite_marker(sentence);
                let offends = if names_past {
                    invites || has_any(sentence, FUTURE_MARKERS)
                } else {
                    !names_upcoming
                        && last_named_past
                        && invites
                        && has_any(sentence, BACK_REFERENCES)
                };
                if names_past || names_upcoming {
                    last_named_past = names_past && !names_upcoming;
                }
                offends
            })
            .collect()
    }

    /// Whether `reply` invites the caller to a past event anywhere.
    pub fn violated_by(&self, reply: &str) -> bool {
        !self.past.is_empty() && self.offending(&sentences(reply)).contains(&true)
    }

    /// `text` without its offending sentences.
    fn keep_allowed<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let sentences = sentences(text);
        let flags = self.offending(&sentences);
        sentences
            .into_iter()
            .zip(flags)
            .filter(|(_, offends)| !offends)
            .map(|(s, _)| s)
            .collect()
    }
}

/// Questions first, then information, minus any sentence that invites the
/// caller to a past event.
pub fn compose_locally(contributions: &[Contribution], now: DateTime<Utc>) -> String {
    let guard = PastEventGuard::from_contributions(contributions, now);
    let ordered = contributions
        .iter()
        .filter(|c| c.is_question())
        .chain(contributions.iter().filter(|c| !c.is_question()));
    let kept: Vec<&str> = ordered
        .flat_map(|c| guard.keep_allowed(&c.text))
        .collect();
    if kept.is_empty() {
        NEUTRAL_ACK.to_owned()
    } else {
        kept.join(" ")
    }
}

fn prompt(fan_in: &FanIn, user_text: &str, summary: &str, now: DateTime<Utc>) -> Prompt {
    let mut user = String::new();
    let _ = writeln!(user, "Current time: {}", spoken_date(now));
    if !summary.trim().is_empty() {
        let _ = writeln!(user, "Conversation so far: {}", summary.trim());
    }
    let _ = writeln!(user, "Caller said: {user_text}");
    let _ = writeln!(user, "Findings:");
    let questions = fan_in.contributions.iter().filter(|c| c.is_question());
    let information = fan_in.contributions.iter().filter(|c| !c.is_question());
    for c in questions {
        let _ = writeln!(user, "- QUESTION ({}): {}", c.category, c.text);
    }
    for c in information {
        let _ = writeln!(user, "- INFO ({}): {}", c.category, c.text);
    }
    let facts: Vec<_> = fan_in.contributions.iter().flat_map(|c| &c.events).collect();
    if !facts.is_empty() {
        let _ = writeln!(user, "Events:");
        for fact in facts {
            let tense = if fact.is_past(now) { "PAST" } else { "UPCOMING" };
            let _ = writeln!(user, "- {} on {}: {tense}", fact.title, spoken_date(fact.starts_at));
        }
    }
    Prompt::new(SYSTEM_PROMPT, user)
}

#[derive(Clone)]
pub struct Consolidator {
    completion: Arc<dyn CompletionService>,
}

impl Consolidator {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    /// Produce the reply for a closed set of contributions.
    pub async fn consolidate(
        &self,
        fan_in: &FanIn,
        user_text: &str,
        summary: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Outcome<String>, Cancelled> {
        if fan_in.dispatched == 0 {
            warn!("consolidation requested with no dispatched handlers");
            return Ok(Outcome::Fallback(NEUTRAL_ACK.to_owned()));
        }
        if fan_in.contributions.is_empty() {
            return Ok(Outcome::Success(NEUTRAL_ACK.to_owned()));
        }

        let started = Instant::now();
        let prompt = prompt(fan_in, user_text, summary, now);
        let reply = cancellable(cancel, self.completion.complete(&prompt)).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let reply = match reply {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_owned(),
            Ok(_) => {
                warn!(elapsed_ms, "consolidation returned an empty reply");
                return Ok(Outcome::Fallback(APOLOGY.to_owned()));
            }
            Err(e) => {
                warn!(elapsed_ms, "consolidation failed: {e}");
                return Ok(Outcome::Fallback(APOLOGY.to_owned()));
            }
        };

        let guard = PastEventGuard::from_contributions(&fan_in.contributions, now);
        if guard.violated_by(&reply) {
            warn!(past = ?guard.past, "merged reply invited the caller to a past event, composing locally");
            return Ok(Outcome::Fallback(compose_locally(&fan_in.contributions, now)));
        }
        info!(elapsed_ms, contributions = fan_in.contributions.len(), "contributions consolidated");
        Ok(Outcome::Success(reply))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::pipeline::contributions::EventFact;
    use crate::pipeline::intent::IntentCategory;
    use crate::test_utils::{ScriptedCompletion, at};

    const NOW: &str = "2026-12-08T09:00:00Z";

    fn summit() -> EventFact {
        EventFact {
            title: "Tech Forward Summit".to_owned(),
            starts_at: at("2026-11-28T09:00:00Z"),
        }
    }

    fn camp() -> EventFact {
        EventFact {
            title: "Holiday Code Camp".to_owned(),
            starts_at: at("2026-12-12T10:00:00Z"),
        }
    }

    fn fan_in(contributions: Vec<Contribution>) -> FanIn {
        FanIn {
            dispatched: contributions.len(),
            contributions,
            form_updates: Vec::new(),
        }
    }

    async fn consolidate(completion: ScriptedCompletion, fan_in: &FanIn) -> (Outcome<String>, Arc<ScriptedCompletion>) {
        let completion = Arc::new(completion);
        let outcome = Consolidator::new(completion.clone())
            .consolidate(fan_in, "hello", "", at(NOW), &CancellationToken::new())
            .await
            .expect("not cancelled");
        (outcome, completion)
    }

    #[test]
    fn sentence_split_keeps_times_together() {
        assert_eq!(
            sentences("It starts at 10:00 UTC. Want in? Great!"),
            vec!["It starts at 10:00 UTC.", "Want in?", "Great!"]
        );
    }

    #[test]
    fn invite_markers_match_whole_words() {
        assert!(has_invite_marker("Would you like to join?"));
        assert!(has_invite_marker("Don't miss it!"));
        assert!(!has_invite_marker("The outcome was a tie."));
        assert!(!has_invite_marker("It was welcoming."));
    }

    fn guard() -> PastEventGuard {
        PastEventGuard::new(
            vec!["Tech Forward Summit".to_owned()],
            vec!["Holiday Code Camp".to_owned()],
        )
    }

    #[test]
    fn past_rule_only_applies_to_past_titles() {
        let guard = guard();
        assert!(guard.violated_by("Come to the Tech Forward Summit!"));
        assert!(!guard.violated_by("The Tech Forward Summit took place last month."));
        assert!(!guard.violated_by("Come to the Holiday Code Camp!"));
    }

    #[test]
    fn invitation_in_a_later_sentence_still_counts() {
        let guard = guard();
        assert!(guard.violated_by("The Tech Forward Summit is coming up soon. Would you like to join it?"));
        assert!(guard.violated_by("The Tech Forward Summit was great. Would you like to join it?"));
        assert!(guard.violated_by("The Tech Forward Summit is happening this week."));
    }

    #[test]
    fn invitation_after_switching_to_an_upcoming_event_is_allowed() {
        let guard = guard();
        assert!(!guard.violated_by(
            "The Tech Forward Summit already took place. Holiday Code Camp is on Saturday. Would you like to join it?"
        ));
        assert!(!guard.violated_by(
            "The Tech Forward Summit already took place. Would you like to join an upcoming event instead?"
        ));
    }

    #[tokio::test]
    async fn empty_log_acknowledges_without_a_call() {
        let fan_in = FanIn {
            dispatched: 1,
            ..FanIn::default()
        };
        let (outcome, completion) = consolidate(ScriptedCompletion::new(), &fan_in).await;
        assert_eq!(outcome, Outcome::Success(NEUTRAL_ACK.to_owned()));
        assert!(completion.calls().is_empty());
    }

    #[tokio::test]
    async fn nothing_dispatched_is_a_fallback_acknowledgement() {
        let (outcome, _) = consolidate(ScriptedCompletion::new(), &FanIn::default()).await;
        assert_eq!(outcome, Outcome::Fallback(NEUTRAL_ACK.to_owned()));
    }

    #[tokio::test]
    async fn merge_failure_apologises() {
        let fan_in = fan_in(vec![Contribution::information(IntentCategory::Neutral, "Hi!")]);
        let (outcome, _) = consolidate(ScriptedCompletion::new().fail_on("merge the findings"), &fan_in).await;
        assert_eq!(outcome, Outcome::Fallback(APOLOGY.to_owned()));
    }

    #[tokio::test]
    async fn questions_are_listed_before_information() {
        let fan_in = fan_in(vec![
            Contribution::information(IntentCategory::Availability, "Holiday Code Camp is on Saturday.")
                .with_events(vec![camp()]),
            Contribution::question(IntentCategory::Registration, "What is your email?"),
        ]);
        let (outcome, completion) =
            consolidate(ScriptedCompletion::new().on("merge the findings", "Merged."), &fan_in).await;
        assert_eq!(outcome, Outcome::Success("Merged.".to_owned()));
        let user = &completion.calls()[0].user;
        let q = user.find("QUESTION").expect("question listed");
        let i = user.find("INFO").expect("info listed");
        assert!(q < i);
        assert!(user.contains("Holiday Code Camp on Saturday, December 12, 2026 at 10:00 UTC: UPCOMING"));
    }

    #[tokio::test]
    async fn invitation_to_past_event_is_replaced() {
        let fan_in = fan_in(vec![
            Contribution::information(
                IntentCategory::Availability,
                "Tech Forward Summit already took place on Saturday, November 28, 2026 at 09:00 UTC.",
            )
            .with_events(vec![summit()]),
            Contribution::question(IntentCategory::Registration, "What is your nickname?"),
        ]);
        let completion = ScriptedCompletion::new().on(
            "merge the findings",
            "Tech Forward Summit is coming up. Would you like to join Tech Forward Summit?",
        );
        let (outcome, _) = consolidate(completion, &fan_in).await;
        assert!(outcome.is_fallback());
        let reply = outcome.into_inner();
        assert!(reply.starts_with("What is your nickname?"));
        assert!(reply.contains("already took place"));
        assert!(!guard().violated_by(&reply));
    }

    #[test]
    fn local_composition_drops_back_referenced_invitations() {
        let contributions = vec![Contribution::information(
            IntentCategory::Neutral,
            "Tech Forward Summit was fun. Want to attend it?",
        )
        .with_events(vec![summit()])];
        assert_eq!(compose_locally(&contributions, at(NOW)), "Tech Forward Summit was fun.");
    }

    #[test]
    fn local_composition_drops_offending_sentences() {
        let contributions = vec![Contribution::information(
            IntentCategory::Neutral,
            "Tech Forward Summit was fun. Sign up for Tech Forward Summit today!",
        )
        .with_events(vec![summit()])];
        assert_eq!(compose_locally(&contributions, at(NOW)), "Tech Forward Summit was fun.");
    }
}
