//! Text completion collaborator.
//!
//! Every language step of a run (classification, extraction, consolidation,
//! summarization) goes through [`CompletionService`]. The production backend
//! is any OpenAI-compatible chat completions server ([`OpenAiCompletion`]).

pub mod json;
pub mod openai;

pub use openai::OpenAiCompletion;

use async_trait::async_trait;

use crate::error::Result;

/// One system + user exchange sent to the completion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Produces a single text completion for a prompt.
///
/// Implementations must be cancel-safe: a run that is preempted drops the
/// in-flight future, and nothing may be left half-applied.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete `prompt`, returning the model's text reply.
    async fn complete(&self, prompt: &Prompt) -> Result<String>;
}
