//! OpenAI-compatible chat completions backend.
//!
//! Works against Ollama, vLLM, llama.cpp server, or the hosted API. Requests
//! are non-streaming: every stage needs the whole reply before it can parse
//! or validate it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{CompletionService, Prompt};
use crate::config::LlmConfig;
use crate::error::{ParleyError, Result};

/// Completion client for `POST {api_url}/v1/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiCompletion {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompletion {
    /// Build a client from config. The API key is read from the environment
    /// variable named by `api_key_env`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the named key variable is missing or the HTTP
    /// client cannot be constructed.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                ParleyError::Config(format!("environment variable {var} is not set"))
            })?),
            None => None,
        };
        Self::new(config, api_key)
    }

    /// Build a client with an explicit API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ParleyError::Llm(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1/chat/completions",
                config.api_url.trim_end_matches('/')
            ),
            model: config.api_model.clone(),
            api_key: api_key.filter(|k| !k.is_empty()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn build_body(&self, prompt: &Prompt) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> ParleyError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => ParleyError::Llm(format!("completion service rejected credentials: {message}")),
        429 => ParleyError::Llm(format!("completion service rate limited: {message}")),
        code => ParleyError::Llm(format!("HTTP {code}: {message}")),
    }
}

/// `{"error": {"message": ...}}` when present, otherwise the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned())
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let mut request = self.client.post(&self.endpoint).json(&self.build_body(prompt));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ParleyError::Llm(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ParleyError::Llm(format!("malformed completion body: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ParleyError::Llm("completion had no choices".to_owned()))?;
        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}
