//! Small talk and anything the other handlers do not cover.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{HandlerOutput, HandlerRequest};
use crate::llm::{CompletionService, Prompt};
use crate::pipeline::contributions::{Contribution, ContributionKind};
use crate::pipeline::intent::IntentCategory;
use crate::pipeline::{Cancelled, cancellable};

pub(super) const FALLBACK_TEXT: &str = "I hear you on that.";

const SYSTEM_PROMPT: &str = "\
You are the friendly voice of a community events desk handling chit-chat.
Reply to what the caller said in one or two short spoken sentences.
Do not invent events, dates or rules, and do not ask for registration details.";

pub(super) fn fallback() -> Contribution {
    Contribution::fallback(
        IntentCategory::Neutral,
        FALLBACK_TEXT,
        ContributionKind::Information,
    )
}

#[derive(Clone)]
pub struct NeutralHandler {
    completion: Arc<dyn CompletionService>,
}

impl NeutralHandler {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    pub(super) async fn handle(
        &self,
        request: &HandlerRequest,
        cancel: &CancellationToken,
    ) -> Result<HandlerOutput, Cancelled> {
        let summary = &request.context.summary;
        let user = if summary.trim().is_empty() {
            request.joined_phrases()
        } else {
            format!(
                "Conversation so far: {summary}\nCaller said: {}",
                request.joined_phrases()
            )
        };
        let prompt = Prompt::new(SYSTEM_PROMPT, user);

        let contribution = match cancellable(cancel, self.completion.complete(&prompt)).await? {
            Ok(reply) if !reply.trim().is_empty() => {
                Contribution::information(IntentCategory::Neutral, reply.trim())
            }
            Ok(_) => {
                warn!("small-talk reply was empty");
                fallback()
            }
            Err(e) => {
                warn!("small-talk completion failed: {e}");
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
    use crate::form::RegistrationForm;
    use crate::pipeline::handlers::TurnContext;
    use crate::test_utils::{ScriptedCompletion, at};

    fn request(phrase: &str, summary: &str) -> HandlerRequest {
        HandlerRequest {
            category: IntentCategory::Neutral,
            phrases: vec![phrase.to_owned()],
            context: Arc::new(TurnContext {
                input: phrase.to_owned(),
                summary: summary.to_owned(),
                form: RegistrationForm::default(),
                now: at("2026-12-08T09:00:00Z"),
            }),
        }
    }

    #[tokio::test]
    async fn replies_with_trimmed_completion() {
        let completion = Arc::new(ScriptedCompletion::new().on("chit-chat", "  Good morning to you too!\n"));
        let output = NeutralHandler::new(completion.clone())
            .handle(&request("Good morning", ""), &CancellationToken::new())
            .await
            .expect("not cancelled");
        let c = output.contribution.expect("contribution");
        assert_eq!(c.text, "Good morning to you too!");
        assert!(!c.fallback);
        assert_eq!(completion.calls()[0].user, "Good morning");
    }

    #[tokio::test]
    async fn summary_is_included_when_present() {
        let completion = Arc::new(ScriptedCompletion::new().on("chit-chat", "Glad to hear it."));
        NeutralHandler::new(completion.clone())
            .handle(&request("it went well", "Caller asked about the expo."), &CancellationToken::new())
            .await
            .expect("not cancelled");
        assert!(completion.calls()[0].user.contains("Caller asked about the expo."));
    }

    #[tokio::test]
    async fn failure_falls_back_to_acknowledgement() {
        let completion = Arc::new(ScriptedCompletion::new().fail_on("chit-chat"));
        let output = NeutralHandler::new(completion)
            .handle(&request("nice weather", ""), &CancellationToken::new())
            .await
            .expect("not cancelled");
        let c = output.contribution.expect("contribution");
        assert!(c.fallback);
        assert_eq!(c.text, FALLBACK_TEXT);
    }

    #[tokio::test]
    async fn cancelled_before_reply() {
        let completion = Arc::new(ScriptedCompletion::new().on("chit-chat", "Hi"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = NeutralHandler::new(completion.clone())
            .handle(&request("hello", ""), &cancel)
            .await;
        assert_eq!(result, Err(Cancelled));
        assert!(completion.calls().is_empty());
    }
}
