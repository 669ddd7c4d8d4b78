//! Fan-out of one handler per intent category and the fan-in barrier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::contributions::{Contribution, ContributionLog};
use super::handlers::{
    FormUpdate, HandlerOutput, HandlerRequest, HandlerSet, TurnContext, fallback_contribution,
};
use super::intent::{IntentCategory, IntentPlan};
use super::{Cancelled, cancellable};

/// Everything the handlers of one run produced, available once all of them
/// have finished.
#[derive(Debug, Clone, Default)]
pub struct FanIn {
    /// One entry per dispatched handler that had text to act on, in
    /// dispatch order.
    pub contributions: Vec<Contribution>,
    /// Form updates in completion order.
    pub form_updates: Vec<FormUpdate>,
    /// Number of handlers started.
    pub dispatched: usize,
}

/// Starts handlers for the categories of an [`IntentPlan`].
#[derive(Clone)]
pub struct Router {
    handlers: HandlerSet,
    stage_timeout: Duration,
}

type TaskResult = Result<Option<FormUpdate>, Cancelled>;

impl Router {
    pub fn new(handlers: HandlerSet, stage_timeout: Duration) -> Self {
        Self {
            handlers,
            stage_timeout,
        }
    }

    /// Spawn one task per category in `plan`. Every task appends to a shared
    /// [`ContributionLog`]; a handler that exceeds the stage timeout
    /// contributes its category's fallback instead.
    pub fn dispatch(
        &self,
        plan: &IntentPlan,
        context: Arc<TurnContext>,
        cancel: &CancellationToken,
    ) -> FanOut {
        let log = ContributionLog::new();
        let mut tasks = JoinSet::new();
        let mut categories = HashMap::new();
        let order: Vec<IntentCategory> = plan.categories().collect();

        for (category, phrases) in plan.groups() {
            let category = *category;
            let handler = self.handlers.get(category);
            let request = HandlerRequest {
                category,
                phrases: phrases.clone(),
                context: Arc::clone(&context),
            };
            let log = log.clone();
            let cancel = cancel.clone();
            let timeout = self.stage_timeout;

            let handle = tasks.spawn(async move {
                let output = match tokio::time::timeout(timeout, handler.handle(&request, &cancel)).await {
                    Ok(Ok(output)) => output,
                    Ok(Err(Cancelled)) => return Err(Cancelled),
                    Err(_) => {
                        warn!(%category, timeout_secs = timeout.as_secs_f32(), "handler timed out");
                        HandlerOutput::contribution(fallback_contribution(category))
                    }
                };
                if let Some(contribution) = output.contribution {
                    log.append(contribution);
                }
                Ok(output.form_update)
            });
            categories.insert(handle.id(), category);
        }

        debug!(dispatched = order.len(), "handlers dispatched");
        FanOut {
            tasks,
            categories,
            order,
            log,
        }
    }
}

/// Handlers in flight for one run.
///
/// Dropping a `FanOut` aborts every handler still running.
pub struct FanOut {
    tasks: JoinSet<TaskResult>,
    categories: HashMap<Id, IntentCategory>,
    order: Vec<IntentCategory>,
    log: ContributionLog,
}

impl FanOut {
    pub fn dispatched(&self) -> usize {
        self.order.len()
    }

    /// Wait until every handler has finished or `cancel` fires.
    ///
    /// A handler task that panics contributes its category's fallback.
    pub async fn join(mut self, cancel: &CancellationToken) -> Result<FanIn, Cancelled> {
        let mut form_updates = Vec::new();
        loop {
            let Some(joined) = cancellable(cancel, self.tasks.join_next_with_id()).await? else {
                break;
            };
            match joined {
                Ok((_, Ok(Some(update)))) => form_updates.push(update),
                Ok((_, Ok(None))) => {}
                Ok((_, Err(Cancelled))) => return Err(Cancelled),
                Err(e) => {
                    let Some(category) = self.categories.get(&e.id()).copied() else {
                        warn!("unknown handler task failed: {e}");
                        continue;
                    };
                    warn!(%category, "handler task failed: {e}");
                    self.log.append(fallback_contribution(category));
                }
            }
        }

        let mut contributions = self.log.snapshot();
        contributions.sort_by_key(|c| {
            self.order
                .iter()
                .position(|category| *category == c.category)
                .unwrap_or(usize::MAX)
        });
        Ok(FanIn {
            contributions,
            form_updates,
            dispatched: self.order.len(),
        })
    }
}
