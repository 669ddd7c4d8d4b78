//! One pass through the pipeline for one combined input.
//!
//! A run reads a [`SessionSnapshot`] and returns [`RunEffects`]; it never
//! touches the session itself. Whether the effects are applied is decided
//! by the coordinator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::consolidator::Consolidator;
use super::handlers::{HandlerSet, TurnContext};
use super::intent::{IntentClassifier, IntentPlan};
use super::messages::RunPhase;
use super::router::Router;
use super::summarizer::Summarizer;
use super::{Cancelled, Clock, Collaborators};
use crate::config::PipelineConfig;
use crate::form::RegistrationForm;
use crate::session::{ChatTurn, RunId, SessionSnapshot};

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_id: String,
    pub run_id: RunId,
    /// Every unanswered fragment, joined.
    pub input: String,
    /// Number of session fragments `input` was built from.
    pub consumed_fragments: usize,
    pub snapshot: SessionSnapshot,
    pub cancel: CancellationToken,
}

/// What a completed run proposes to write back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEffects {
    pub reply: String,
    pub user_text: String,
    pub form: RegistrationForm,
    pub summary: String,
    /// Set when the caller confirmed a complete registration this run.
    pub confirmed_registration: Option<RegistrationForm>,
    pub consumed_fragments: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunEffects),
    Cancelled,
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// The stages of a run, wired to their collaborators.
#[derive(Clone)]
pub struct Pipeline {
    classifier: IntentClassifier,
    router: Router,
    consolidator: Consolidator,
    summarizer: Summarizer,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(collaborators: &Collaborators, config: &PipelineConfig) -> Self {
        Self {
            classifier: IntentClassifier::new(Arc::clone(&collaborators.completion)),
            router: Router::new(
                HandlerSet::new(collaborators, config),
                Duration::from_secs(config.stage_timeout_secs.max(1)),
            ),
            consolidator: Consolidator::new(Arc::clone(&collaborators.completion)),
            summarizer: Summarizer::new(Arc::clone(&collaborators.completion), config.summary_window),
            clock: Arc::clone(&collaborators.clock),
        }
    }

    /// Run every stage up to and including the summary. `phase` is told
    /// when each stage begins.
    pub async fn execute<P>(&self, ctx: &RunContext, phase: P) -> RunOutcome
    where
        P: Fn(RunPhase) + Send + Sync,
    {
        match self.stages(ctx, &phase).await {
            Ok(effects) => RunOutcome::Completed(effects),
            Err(Cancelled) => {
                debug!(run = %ctx.run_id, "run cancelled");
                RunOutcome::Cancelled
            }
        }
    }

    async fn stages<P>(&self, ctx: &RunContext, phase: &P) -> Result<RunEffects, Cancelled>
    where
        P: Fn(RunPhase) + Send + Sync,
    {
        let cancel = &ctx.cancel;
        let snapshot = &ctx.snapshot;
        let now = self.clock.now();

        phase(RunPhase::Classifying);
        let started = Instant::now();
        let spans = self.classifier.classify(&ctx.input, &snapshot.summary, cancel).await?;
        info!(
            elapsed_ms = elapsed_ms(started),
            fallback = spans.is_fallback(),
            "input classified"
        );
        let plan = IntentPlan::from_spans(&spans.into_inner());

        phase(RunPhase::FanOutRunning);
        let started = Instant::now();
        let context = Arc::new(TurnContext {
            input: ctx.input.clone(),
            summary: snapshot.summary.clone(),
            form: snapshot.form.clone(),
            now,
        });
        let fan_in = self.router.dispatch(&plan, context, cancel).join(cancel).await?;
        info!(
            elapsed_ms = elapsed_ms(started),
            dispatched = fan_in.dispatched,
            contributions = fan_in.contributions.len(),
            "handlers finished"
        );

        phase(RunPhase::Consolidating);
        let reply = self
            .consolidator
            .consolidate(&fan_in, &ctx.input, &snapshot.summary, now, cancel)
            .await?
            .into_inner();

        let (form, confirmed_registration) = match fan_in.form_updates.into_iter().last() {
            Some(update) => {
                let confirmed = update.confirmed.then(|| update.form.clone());
                (update.form, confirmed)
            }
            None => (snapshot.form.clone(), None),
        };

        let mut history = snapshot.history.clone();
        history.push(ChatTurn::user(&ctx.input));
        history.push(ChatTurn::assistant(&reply));
        let summary = self
            .summarizer
            .summarize(&history, &snapshot.summary, cancel)
            .await?
            .into_inner();

        Ok(RunEffects {
            reply,
            user_text: ctx.input.clone(),
            form,
            summary,
            confirmed_registration,
            consumed_fragments: ctx.consumed_fragments,
        })
    }
}
