//! Rolling summary over the trailing message history.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Cancelled, Outcome, cancellable};
use crate::llm::{CompletionService, Prompt};
use crate::session::ChatTurn;

const SYSTEM_PROMPT: &str = "\
You keep a running summary of a phone conversation between a caller and an events assistant.
Write at most three sentences. Keep names, chosen events, registration progress and open questions.
Return only the summary.";

#[derive(Clone)]
pub struct Summarizer {
    completion: Arc<dyn CompletionService>,
    window: usize,
}

impl Summarizer {
    pub fn new(completion: Arc<dyn CompletionService>, window: usize) -> Self {
        Self {
            completion,
            window: window.max(1),
        }
    }

    fn prompt(&self, history: &[ChatTurn], prior: &str) -> Prompt {
        let start = history.len().saturating_sub(self.window);
        let mut user = String::new();
        if !prior.trim().is_empty() {
            let _ = writeln!(user, "Previous summary: {}", prior.trim());
        }
        let _ = writeln!(user, "Latest messages:");
        for (i, turn) in history[start..].iter().enumerate() {
            let _ = writeln!(user, "{}. [{}]: {}", i + 1, turn.role.label(), turn.content);
        }
        Prompt::new(SYSTEM_PROMPT, user)
    }

    /// Summarize the last `window` entries of `history`. On failure the
    /// prior summary is returned unchanged as a fallback.
    pub async fn summarize(
        &self,
        history: &[ChatTurn],
        prior: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome<String>, Cancelled> {
        if history.is_empty() {
            return Ok(Outcome::Fallback(prior.to_owned()));
        }
        let started = Instant::now();
        let prompt = self.prompt(history, prior);
        let reply = cancellable(cancel, self.completion.complete(&prompt)).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match reply {
            Ok(summary) if !summary.trim().is_empty() => {
                info!(elapsed_ms, "summary updated");
                Ok(Outcome::Success(summary.trim().to_owned()))
            }
            Ok(_) => {
                warn!(elapsed_ms, "summarizer returned nothing, keeping prior summary");
                Ok(Outcome::Fallback(prior.to_owned()))
            }
            Err(e) => {
                warn!(elapsed_ms, "summarizer failed, keeping prior summary: {e}");
                Ok(Outcome::Fallback(prior.to_owned()))
            }
        }
    }
}
