//! Intent classification: one combined input becomes a list of
//! `(category, phrase)` spans.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Cancelled, Outcome, cancellable};
use crate::error::{ParleyError, Result};
use crate::llm::{CompletionService, Prompt, json};

/// Phrase used for the single neutral span when classification fails.
pub const UNCLEAR_INPUT_PHRASE: &str = "My apologies but I cannot understand what you were trying to say. Can you repeat your statement?";

const SYSTEM_PROMPT: &str = "\
You split a caller's message into intents for an event concierge.
Categories:
- availability: asking which events exist, when they happen, or what is on.
- registration: wanting to sign up, giving their name, email, nickname or the event they want, or confirming a sign-up.
- rule_lookup: asking about the rules, format or policies of an event or game.
- neutral: greetings, thanks, small talk and anything else.
Return only a JSON array. Each element is {\"intent\": <category>, \"phrase\": <the caller's words for that intent>}.
Cover the whole message and use several elements when the message mixes intents.";

/// Closed set of intent categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Availability,
    Registration,
    Neutral,
    RuleLookup,
}

impl IntentCategory {
    pub const ALL: [Self; 4] = [
        Self::Availability,
        Self::Registration,
        Self::Neutral,
        Self::RuleLookup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Availability => "availability",
            Self::Registration => "registration",
            Self::Neutral => "neutral",
            Self::RuleLookup => "rule_lookup",
        }
    }

    /// Map a model-produced label onto a category. Case, surrounding
    /// whitespace and `-`/space versus `_` are ignored; anything outside the
    /// fixed set is neutral.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase().replace(['-', ' '], "_");
        match label.as_str() {
            "availability" => Self::Availability,
            "registration" => Self::Registration,
            "rule_lookup" | "game_rules" => Self::RuleLookup,
            _ => Self::Neutral,
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified fragment of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentSpan {
    pub category: IntentCategory,
    /// Non-empty text of the fragment.
    pub phrase: String,
}

impl IntentSpan {
    pub fn new(category: IntentCategory, phrase: impl Into<String>) -> Self {
        Self {
            category,
            phrase: phrase.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSpan {
    #[serde(alias = "category", alias = "type")]
    intent: String,
    #[serde(alias = "phrase_message", alias = "text", alias = "message")]
    phrase: String,
}

/// Spans grouped by category, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentPlan {
    groups: Vec<(IntentCategory, Vec<String>)>,
}

impl IntentPlan {
    pub fn from_spans(spans: &[IntentSpan]) -> Self {
        let mut groups: Vec<(IntentCategory, Vec<String>)> = Vec::new();
        for span in spans {
            match groups.iter_mut().find(|(c, _)| *c == span.category) {
                Some((_, phrases)) => phrases.push(span.phrase.clone()),
                None => groups.push((span.category, vec![span.phrase.clone()])),
            }
        }
        Self { groups }
    }

    pub fn groups(&self) -> &[(IntentCategory, Vec<String>)] {
        &self.groups
    }

    pub fn categories(&self) -> impl Iterator<Item = IntentCategory> + '_ {
        self.groups.iter().map(|(c, _)| *c)
    }

    pub fn phrases(&self, category: IntentCategory) -> Option<&[String]> {
        self.groups
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, p)| p.as_slice())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Parse a classifier reply, dropping spans whose phrase is blank.
///
/// # Errors
///
/// Returns [`ParleyError::Llm`] if the reply holds no JSON array or no span
/// survives normalisation.
pub fn parse_spans(reply: &str) -> Result<Vec<IntentSpan>> {
    let raw: Vec<RawSpan> = json::parse_array(reply)?;
    let spans: Vec<IntentSpan> = raw
        .into_iter()
        .filter_map(|r| {
            let phrase = r.phrase.trim();
            (!phrase.is_empty())
                .then(|| IntentSpan::new(IntentCategory::from_label(&r.intent), phrase))
        })
        .collect();
    if spans.is_empty() {
        return Err(ParleyError::Llm("classifier returned no usable spans".to_owned()));
    }
    Ok(spans)
}

/// Classifies combined input through the completion service.
#[derive(Clone)]
pub struct IntentClassifier {
    completion: Arc<dyn CompletionService>,
}

impl IntentClassifier {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    fn prompt(input: &str, summary: &str) -> Prompt {
        let user = if summary.trim().is_empty() {
            format!("Message: {input}")
        } else {
            format!("Conversation so far: {summary}\n\nMessage: {input}")
        };
        Prompt::new(SYSTEM_PROMPT, user)
    }

    /// Classify `input`. Any collaborator failure yields a single neutral
    /// span carrying [`UNCLEAR_INPUT_PHRASE`].
    pub async fn classify(
        &self,
        input: &str,
        summary: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Outcome<Vec<IntentSpan>>, Cancelled> {
        let prompt = Self::prompt(input, summary);
        let reply = cancellable(cancel, self.completion.complete(&prompt)).await?;
        match reply.and_then(|r| parse_spans(&r)) {
            Ok(spans) => {
                debug!(spans = spans.len(), "input classified");
                Ok(Outcome::Success(spans))
            }
            Err(e) => {
                warn!("classification failed, treating input as unclear: {e}");
                Ok(Outcome::Fallback(vec![IntentSpan::new(
                    IntentCategory::Neutral,
                    UNCLEAR_INPUT_PHRASE,
                )]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::test_utils::ScriptedCompletion;

    #[test]
    fn labels_map_leniently() {
        assert_eq!(IntentCategory::from_label("Availability"), IntentCategory::Availability);
        assert_eq!(IntentCategory::from_label("registration"), IntentCategory::Registration);
        assert_eq!(IntentCategory::from_label("game_rules"), IntentCategory::RuleLookup);
        assert_eq!(IntentCategory::from_label("rule_lookup"), IntentCategory::RuleLookup);
        assert_eq!(IntentCategory::from_label(" Rule-Lookup "), IntentCategory::RuleLookup);
        assert_eq!(IntentCategory::from_label("weather"), IntentCategory::Neutral);
    }

    #[test]
    fn labels_outside_the_set_are_neutral() {
        for label in ["unavailable", "deregistration", "rulebook_small_talk", "avail", ""] {
            assert_eq!(IntentCategory::from_label(label), IntentCategory::Neutral, "{label}");
        }
    }

    #[test]
    fn parse_drops_blank_phrases() {
        let reply = r#"[{"intent":"availability","phrase":"Any events?"},{"intent":"neutral","phrase":"  "}]"#;
        let spans = parse_spans(reply).expect("parse");
        assert_eq!(spans, vec![IntentSpan::new(IntentCategory::Availability, "Any events?")]);
    }

    #[test]
    fn parse_accepts_legacy_field_names() {
        let reply = r#"[{"category":"game_rules","phrase_message":"How long is a round?"}]"#;
        let spans = parse_spans(reply).expect("parse");
        assert_eq!(spans[0].category, IntentCategory::RuleLookup);
    }

    #[test]
    fn parse_rejects_all_blank() {
        assert!(parse_spans(r#"[{"intent":"neutral","phrase":""}]"#).is_err());
        assert!(parse_spans("I think this is availability").is_err());
    }

    #[test]
    fn plan_groups_by_first_appearance() {
        let spans = vec![
            IntentSpan::new(IntentCategory::Registration, "sign me up"),
            IntentSpan::new(IntentCategory::Availability, "what's on"),
            IntentSpan::new(IntentCategory::Registration, "my email is a@b.c"),
        ];
        let plan = IntentPlan::from_spans(&spans);
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.categories().collect::<Vec<_>>(),
            vec![IntentCategory::Registration, IntentCategory::Availability]
        );
        assert_eq!(
            plan.phrases(IntentCategory::Registration),
            Some(&["sign me up".to_owned(), "my email is a@b.c".to_owned()][..])
        );
        assert_eq!(plan.phrases(IntentCategory::Neutral), None);
    }

    #[tokio::test]
    async fn classify_success() {
        let completion = Arc::new(ScriptedCompletion::new().on(
            "into intents",
            r#"```json
[{"intent":"availability","phrase":"Is there an event this week?"},{"intent":"registration","phrase":"I'd like to join."}]
```"#,
        ));
        let classifier = IntentClassifier::new(completion.clone());
        let outcome = classifier
            .classify("Is there an event this week? I'd like to join.", "", &CancellationToken::new())
            .await
            .expect("not cancelled");
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.into_inner().len(), 2);
        assert!(completion.calls()[0].user.contains("I'd like to join."));
    }

    #[tokio::test]
    async fn classify_failure_falls_back_to_unclear_neutral() {
        let completion = Arc::new(ScriptedCompletion::new().fail_on("into intents"));
        let classifier = IntentClassifier::new(completion);
        let outcome = classifier
            .classify("mumble", "", &CancellationToken::new())
            .await
            .expect("not cancelled");
        assert!(outcome.is_fallback());
        assert_eq!(
            outcome.into_inner(),
            vec![IntentSpan::new(IntentCategory::Neutral, UNCLEAR_INPUT_PHRASE)]
        );
    }

    #[tokio::test]
    async fn classify_observes_cancellation() {
        let completion = Arc::new(ScriptedCompletion::new().on("into intents", "[]"));
        let classifier = IntentClassifier::new(completion);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(classifier.classify("x", "", &cancel).await, Err(Cancelled));
    }
}
