//! Registration: collect name, email, nickname and event, read them back,
//! and confirm.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{FormUpdate, HandlerOutput, HandlerRequest};
use crate::error::Result;
use crate::form::{ExtractedFields, FormField, RegistrationForm, RegistrationStage};
use crate::llm::{CompletionService, Prompt, json};
use crate::pipeline::contributions::{Contribution, ContributionKind};
use crate::pipeline::intent::IntentCategory;
use crate::pipeline::{Cancelled, cancellable};

pub(super) const FALLBACK_TEXT: &str =
    "Sorry, I couldn't understand your registration input. Could you please rephrase?";

const SYSTEM_PROMPT: &str = "\
You extract event registration details from what a caller said.
Return only a JSON object with the keys \"registration\", \"fullname\", \"email\", \"nickname\" and \"event_details\".
Use null for any detail the caller did not mention in this message.
\"registration\" is one of:
- \"Complete\" when the caller clearly confirms a registration whose details were already read back to them,
- \"Updating\" when the caller gives or corrects details,
- \"Incomplete\" otherwise.";

pub(super) fn fallback() -> Contribution {
    Contribution::fallback(
        IntentCategory::Registration,
        FALLBACK_TEXT,
        ContributionKind::PendingQuestion,
    )
}

/// Status word from the extraction reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    Incomplete,
    Updating,
    Complete,
    Unrecognized,
}

impl ExtractionStatus {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("incomplete") | None => Self::Incomplete,
            Some("updating") | Some("update") => Self::Updating,
            Some("complete") | Some("completed") | Some("confirmed") => Self::Complete,
            Some(_) => Self::Unrecognized,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtractionReply {
    #[serde(default, alias = "status")]
    registration: Option<String>,
    #[serde(flatten)]
    fields: ExtractedFields,
}

/// Next step of the registration conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStep {
    AskMissing(Vec<FormField>),
    ReadBack,
    Confirmed,
    AlreadyRegistered,
    Unrecognized,
}

/// Decide the next step from the form before this turn, the merged form
/// and the extraction status.
pub fn decide(
    previous: &RegistrationForm,
    merged: &RegistrationForm,
    status: ExtractionStatus,
) -> RegistrationStep {
    if status == ExtractionStatus::Unrecognized {
        return RegistrationStep::Unrecognized;
    }
    let missing = merged.missing_fields();
    if !missing.is_empty() {
        return RegistrationStep::AskMissing(missing);
    }
    match status {
        ExtractionStatus::Complete
            if previous.stage == RegistrationStage::Done && previous.same_details(merged) =>
        {
            RegistrationStep::AlreadyRegistered
        }
        ExtractionStatus::Complete => RegistrationStep::Confirmed,
        _ => RegistrationStep::ReadBack,
    }
}

/// "a", "a and b", "a, b and c".
fn natural_list(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [one] => (*one).to_owned(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

/// Spoken text, contribution kind and form update for `step`.
fn render(step: &RegistrationStep, merged: &RegistrationForm) -> (String, ContributionKind, Option<FormUpdate>) {
    match step {
        RegistrationStep::AskMissing(missing) => {
            let labels: Vec<&str> = missing.iter().map(|f| f.label()).collect();
            (
                format!(
                    "I'd love to secure your spot. Could you please provide your {}?",
                    natural_list(&labels)
                ),
                ContributionKind::PendingQuestion,
                Some(FormUpdate {
                    form: merged.with_stage(RegistrationStage::Collecting),
                    confirmed: false,
                }),
            )
        }
        RegistrationStep::ReadBack => (
            format!(
                "Here are your registration details: name {}, nickname {}, email {}, event {}. Can I confirm your registration now?",
                merged.fullname, merged.nickname, merged.email, merged.event
            ),
            ContributionKind::PendingQuestion,
            Some(FormUpdate {
                form: merged.with_stage(RegistrationStage::Confirming),
                confirmed: false,
            }),
        ),
        RegistrationStep::Confirmed => (
            format!(
                "Perfect {}! Your registration for {} is confirmed and a confirmation will be sent to {}. It's nice to have you, {}.",
                merged.fullname, merged.event, merged.email, merged.nickname
            ),
            ContributionKind::Information,
            Some(FormUpdate {
                form: merged.with_stage(RegistrationStage::Done),
                confirmed: true,
            }),
        ),
        RegistrationStep::AlreadyRegistered => (
            format!(
                "You're already registered for {}, {}.",
                merged.event, merged.nickname
            ),
            ContributionKind::Information,
            None,
        ),
        RegistrationStep::Unrecognized => {
            (FALLBACK_TEXT.to_owned(), ContributionKind::PendingQuestion, None)
        }
    }
}

#[derive(Clone)]
pub struct RegistrationHandler {
    completion: Arc<dyn CompletionService>,
}

impl RegistrationHandler {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    fn prompt(request: &HandlerRequest) -> Prompt {
        let ctx = &request.context;
        let form = serde_json::json!({
            "fullname": ctx.form.fullname,
            "email": ctx.form.email,
            "nickname": ctx.form.nickname,
            "event_details": ctx.form.event,
        });
        let stage = match ctx.form.stage {
            RegistrationStage::NotStarted => "not started",
            RegistrationStage::Collecting => "collecting details",
            RegistrationStage::Confirming => "details read back, awaiting confirmation",
            RegistrationStage::Done => "already registered",
        };
        let mut user = format!("Current form: {form}\nStage: {stage}\n");
        if !ctx.summary.trim().is_empty() {
            user.push_str(&format!("Conversation so far: {}\n", ctx.summary));
        }
        user.push_str(&format!("Caller said: {}", request.joined_phrases()));
        Prompt::new(SYSTEM_PROMPT, user)
    }

    async fn extract(&self, prompt: &Prompt) -> Result<ExtractionReply> {
        let reply = self.completion.complete(prompt).await?;
        json::parse_object(&reply)
    }

    pub(super) async fn handle(
        &self,
        request: &HandlerRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<HandlerOutput, Cancelled> {
        let prompt = Self::prompt(request);
        let extraction = match cancellable(cancel, self.extract(&prompt)).await? {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!("registration extraction failed, form unchanged: {e}");
                return Ok(HandlerOutput::contribution(fallback()));
            }
        };

        let previous = &request.context.form;
        let merged = previous.merge(&extraction.fields);
        let status = ExtractionStatus::parse(extraction.registration.as_deref());
        let step = decide(previous, &merged, status);
        debug!(?status, ?step, "registration step");

        let (text, kind, update) = render(&step, &merged);
        let contribution = match kind {
            ContributionKind::PendingQuestion => Contribution::question(IntentCategory::Registration, text),
            ContributionKind::Information => Contribution::information(IntentCategory::Registration, text),
        };
        let output = HandlerOutput::contribution(contribution);
        Ok(match update {
            Some(update) => output.with_form(update),
            None => output,
        })
    }
}
