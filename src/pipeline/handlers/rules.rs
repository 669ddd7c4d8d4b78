//! Rule lookup: answer policy questions from retrieved rule passages.

use std::fmt::Write as _;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{HandlerOutput, HandlerRequest};
use crate::error::Result;
use crate::llm::{CompletionService, Prompt};
use crate::pipeline::contributions::{Contribution, ContributionKind};
use crate::pipeline::intent::IntentCategory;
use crate::pipeline::{Cancelled, cancellable};
use crate::store::{RankedPassage, RuleRetriever};

pub(super) const FALLBACK_TEXT: &str =
    "Sorry, I'm having trouble accessing the rules right now. Please try again later.";

pub(super) const NO_RULE_TEXT: &str = "I couldn't find a rule covering that question.";

const SYSTEM_PROMPT: &str = "\
You answer questions about event rules using only the numbered passages provided.
Answer in one to three short spoken sentences.
If the passages do not answer the question, say that you could not find a rule covering it.";

pub(super) fn fallback() -> Contribution {
    Contribution::fallback(
        IntentCategory::RuleLookup,
        FALLBACK_TEXT,
        ContributionKind::Information,
    )
}

fn numbered_passages(passages: &[RankedPassage]) -> String {
    let mut out = String::new();
    for (i, passage) in passages.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. Q: {} A: {}",
            i + 1,
            passage.document.question.trim(),
            passage.document.answer.trim()
        );
    }
    out
}

#[derive(Clone)]
pub struct RuleLookupHandler {
    rules: Arc<dyn RuleRetriever>,
    completion: Arc<dyn CompletionService>,
    top_k: usize,
}

impl RuleLookupHandler {
    pub fn new(rules: Arc<dyn RuleRetriever>, completion: Arc<dyn CompletionService>, top_k: usize) -> Self {
        Self {
            rules,
            completion,
            top_k: top_k.max(1),
        }
    }

    async fn answer(&self, question: &str) -> Result<String> {
        let passages = self.rules.retrieve(question, self.top_k).await?;
        debug!(count = passages.len(), "rule passages retrieved");
        if passages.is_empty() {
            return Ok(NO_RULE_TEXT.to_owned());
        }
        let prompt = Prompt::new(
            SYSTEM_PROMPT,
            format!(
                "Passages:\n{}\nQuestion: {question}",
                numbered_passages(&passages)
            ),
        );
        self.completion.complete(&prompt).await
    }

    pub(super) async fn handle(
        &self,
        request: &HandlerRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<HandlerOutput, Cancelled> {
        let question = request.joined_phrases();
        let contribution = match cancellable(cancel, self.answer(&question)).await? {
            Ok(answer) if !answer.trim().is_empty() => {
                Contribution::information(IntentCategory::RuleLookup, answer.trim())
            }
            Ok(_) => fallback(),
            Err(e) => {
                warn!("rule lookup failed: {e}");
                fallback()
            }
        };
        Ok(HandlerOutput::contribution(contribution))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::error::ParleyError;
    use crate::form::RegistrationForm;
    use crate::pipeline::handlers::TurnContext;
    use crate::store::{RuleDocument, SqliteStore};
    use crate::test_utils::{ScriptedCompletion, at};

    fn request(phrase: &str) -> HandlerRequest {
        HandlerRequest {
            category: IntentCategory::RuleLookup,
            phrases: vec![phrase.to_owned()],
            context: Arc::new(TurnContext {
                input: phrase.to_owned(),
                summary: String::new(),
                form: RegistrationForm::default(),
                now: at("2026-12-08T09:00:00Z"),
            }),
        }
    }

    async fn rule_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("store");
        store
            .upsert_rule(RuleDocument {
                id: "pets".to_owned(),
                question: "Can I bring my dog?".to_owned(),
                answer: "Pets are not allowed inside the venue, except service animals.".to_owned(),
                category: "venue".to_owned(),
            })
            .await
            .expect("rule");
        store
    }

    struct BrokenRules;

    #[async_trait::async_trait]
    impl RuleRetriever for BrokenRules {
        async fn retrieve(&self, _: &str, _: usize) -> Result<Vec<RankedPassage>> {
            Err(ParleyError::Store("index missing".to_owned()))
        }
    }

    #[tokio::test]
    async fn answers_from_retrieved_passages() {
        let completion = Arc::new(
            ScriptedCompletion::new().on("event rules", "Only service animals are allowed inside."),
        );
        let handler = RuleLookupHandler::new(Arc::new(rule_store().await), completion.clone(), 3);
        let output = handler
            .handle(&request("Can I bring my dog?"), &CancellationToken::new())
            .await
            .expect("not cancelled");
        let c = output.contribution.expect("contribution");
        assert_eq!(c.text, "Only service animals are allowed inside.");
        let prompt = &completion.calls()[0];
        assert!(prompt.user.contains("1. Q: Can I bring my dog?"));
    }

    #[tokio::test]
    async fn no_matching_passage_skips_completion() {
        let completion = Arc::new(ScriptedCompletion::new().on("event rules", "unused"));
        let handler = RuleLookupHandler::new(Arc::new(rule_store().await), completion.clone(), 3);
        let output = handler
            .handle(&request("Is parking free?"), &CancellationToken::new())
            .await
            .expect("not cancelled");
        assert_eq!(output.contribution.expect("contribution").text, NO_RULE_TEXT);
        assert!(completion.calls().is_empty());
    }

    #[tokio::test]
    async fn retriever_failure_falls_back() {
        let completion = Arc::new(ScriptedCompletion::new());
        let handler = RuleLookupHandler::new(Arc::new(BrokenRules), completion, 3);
        let output = handler
            .handle(&request("Can I bring food?"), &CancellationToken::new())
            .await
            .expect("not cancelled");
        let c = output.contribution.expect("contribution");
        assert!(c.fallback);
        assert_eq!(c.text, FALLBACK_TEXT);
    }
}
