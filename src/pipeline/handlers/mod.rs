//! Intent handlers.
//!
//! Each category has exactly one handler. A dispatched handler always yields
//! exactly one [`Contribution`]: when its collaborator fails it substitutes
//! a fixed fallback text instead of returning an error. Handlers only read
//! the shared [`TurnContext`]; the registration handler proposes a new form
//! through [`FormUpdate`], which is applied only if the run commits.

pub mod availability;
pub mod neutral;
pub mod registration;
pub mod rules;

pub use availability::AvailabilityHandler;
pub use neutral::NeutralHandler;
pub use registration::RegistrationHandler;
pub use rules::RuleLookupHandler;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::contributions::Contribution;
use super::intent::IntentCategory;
use super::{Cancelled, Collaborators};
use crate::config::PipelineConfig;
use crate::form::RegistrationForm;

/// Read-only state shared by every handler of one run.
#[derive(Debug, Clone)]
pub struct TurnContext {
    /// Combined input of the run.
    pub input: String,
    /// Rolling summary as of run start.
    pub summary: String,
    /// Registration form as of run start.
    pub form: RegistrationForm,
    pub now: DateTime<Utc>,
}

/// The phrases of one category, plus shared context.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub category: IntentCategory,
    pub phrases: Vec<String>,
    pub context: Arc<TurnContext>,
}

impl HandlerRequest {
    /// All phrases of the category joined by single spaces.
    pub fn joined_phrases(&self) -> String {
        self.phrases.join(" ")
    }
}

/// Proposed replacement for the session's registration form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormUpdate {
    pub form: RegistrationForm,
    /// The caller confirmed; the form must be persisted on commit.
    pub confirmed: bool,
}

/// What a handler returns to the router.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerOutput {
    pub contribution: Option<Contribution>,
    pub form_update: Option<FormUpdate>,
}

impl HandlerOutput {
    pub fn contribution(contribution: Contribution) -> Self {
        Self {
            contribution: Some(contribution),
            form_update: None,
        }
    }

    pub fn with_form(mut self, update: FormUpdate) -> Self {
        self.form_update = Some(update);
        self
    }
}

/// Handler for one category.
#[derive(Clone)]
pub enum Handler {
    Availability(AvailabilityHandler),
    Registration(RegistrationHandler),
    Neutral(NeutralHandler),
    RuleLookup(RuleLookupHandler),
}

impl Handler {
    pub fn category(&self) -> IntentCategory {
        match self {
            Self::Availability(_) => IntentCategory::Availability,
            Self::Registration(_) => IntentCategory::Registration,
            Self::Neutral(_) => IntentCategory::Neutral,
            Self::RuleLookup(_) => IntentCategory::RuleLookup,
        }
    }

    /// Handle `request`. Returns no contribution if the request is not for
    /// this handler's category or carries no text.
    pub async fn handle(
        &self,
        request: &HandlerRequest,
        cancel: &CancellationToken,
    ) -> Result<HandlerOutput, Cancelled> {
        if request.category != self.category() || request.phrases.iter().all(|p| p.trim().is_empty()) {
            debug!(
                handler = %self.category(),
                requested = %request.category,
                "handler skipped: category not selected"
            );
            return Ok(HandlerOutput::default());
        }
        match self {
            Self::Availability(h) => h.handle(request, cancel).await,
            Self::Registration(h) => h.handle(request, cancel).await,
            Self::Neutral(h) => h.handle(request, cancel).await,
            Self::RuleLookup(h) => h.handle(request, cancel).await,
        }
    }
}

/// The contribution a category falls back to when its handler cannot finish.
pub fn fallback_contribution(category: IntentCategory) -> Contribution {
    match category {
        IntentCategory::Availability => availability::fallback(),
        IntentCategory::Registration => registration::fallback(),
        IntentCategory::Neutral => neutral::fallback(),
        IntentCategory::RuleLookup => rules::fallback(),
    }
}

/// One handler per category.
#[derive(Clone)]
pub struct HandlerSet {
    availability: AvailabilityHandler,
    registration: RegistrationHandler,
    neutral: NeutralHandler,
    rule_lookup: RuleLookupHandler,
}

impl HandlerSet {
    pub fn new(collaborators: &Collaborators, config: &PipelineConfig) -> Self {
        Self {
            availability: AvailabilityHandler::new(Arc::clone(&collaborators.events), config.max_events),
            registration: RegistrationHandler::new(Arc::clone(&collaborators.completion)),
            neutral: NeutralHandler::new(Arc::clone(&collaborators.completion)),
            rule_lookup: RuleLookupHandler::new(
                Arc::clone(&collaborators.rules),
                Arc::clone(&collaborators.completion),
                config.rule_top_k,
            ),
        }
    }

    pub fn get(&self, category: IntentCategory) -> Handler {
        match category {
            IntentCategory::Availability => Handler::Availability(self.availability.clone()),
            IntentCategory::Registration => Handler::Registration(self.registration.clone()),
            IntentCategory::Neutral => Handler::Neutral(self.neutral.clone()),
            IntentCategory::RuleLookup => Handler::RuleLookup(self.rule_lookup.clone()),
        }
    }
}
