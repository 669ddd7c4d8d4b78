//! Configuration types for the voice concierge.
//!
//! Every section is `#[serde(default)]`, so a partial TOML file only needs
//! to name the values it overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ParleyError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    /// WebSocket server settings.
    pub server: ServerConfig,
    /// Accepted access tokens.
    pub auth: AuthConfig,
    /// Inbound audio format.
    pub audio: AudioConfig,
    /// Speech-to-text engine.
    pub stt: SttConfig,
    /// Text-to-speech engine.
    pub tts: TtsConfig,
    /// Completion service.
    pub llm: LlmConfig,
    /// SQLite store.
    pub store: StoreConfig,
    /// Per-run pipeline tuning.
    pub pipeline: PipelineConfig,
    /// Log filter and optional rolling file output.
    pub logging: LoggingConfig,
}

/// WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Path of the voice WebSocket endpoint.
    pub path: String,
    /// Capacity of the per-connection outbound frame queue.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8000,
            path: "/stream/voicein".to_owned(),
            outbound_queue: 64,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One accepted access token and the identity it grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// Opaque bearer token presented by the client.
    pub token: String,
    /// Stable subject identifier; sessions are keyed by it.
    pub subject: String,
    /// Display name used to seed the registration form.
    #[serde(default)]
    pub name: Option<String>,
    /// Email used to seed the registration form.
    #[serde(default)]
    pub email: Option<String>,
}

/// Access token configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: Vec<TokenGrant>,
}

/// Inbound audio format. Clients send 16-bit little-endian PCM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of inbound utterances in Hz.
    pub sample_rate: u32,
    /// Channel count of inbound utterances.
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
        }
    }
}

/// Speech-to-text configuration (whisper.cpp command line).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Path or name of the `whisper-cli` executable.
    pub whisper_bin: String,
    /// Path to the GGML model file.
    pub model_path: PathBuf,
    /// Spoken language code.
    pub language: String,
    /// Threads per transcription.
    pub threads: u32,
    /// Maximum concurrent transcriptions across all connections.
    pub max_concurrent: usize,
    /// Directory for temporary WAV files. Defaults to the system temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            whisper_bin: "whisper-cli".to_owned(),
            model_path: PathBuf::from("models/ggml-base.en.bin"),
            language: "en".to_owned(),
            threads: 4,
            max_concurrent: 2,
            temp_dir: None,
        }
    }
}

/// Text-to-speech configuration (piper command line).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Path or name of the `piper` executable.
    pub piper_bin: String,
    /// Path to the ONNX voice model.
    pub model_path: PathBuf,
    /// Optional voice config JSON. Piper looks next to the model when unset.
    pub config_path: Option<PathBuf>,
    /// Output sample rate of the voice in Hz.
    pub sample_rate: u32,
    /// Size of each outbound audio chunk in bytes.
    pub chunk_bytes: usize,
    /// Maximum concurrent syntheses across all connections.
    pub max_concurrent: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            piper_bin: "piper".to_owned(),
            model_path: PathBuf::from("models/en_US-lessac-medium.onnx"),
            config_path: None,
            sample_rate: 22_050,
            chunk_bytes: 8192,
            max_concurrent: 2,
        }
    }
}

/// Completion service configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL; `/v1/chat/completions` is appended.
    pub api_url: String,
    /// Model name sent with every request.
    pub api_model: String,
    /// Environment variable holding the API key. Unset means no auth header.
    pub api_key_env: Option<String>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            // Ollama exposes the OpenAI-compatible surface on this port.
            api_url: "http://localhost:11434".to_owned(),
            api_model: "llama3.1:8b".to_owned(),
            api_key_env: None,
            temperature: 0.2,
            max_tokens: 400,
            timeout_secs: 30,
        }
    }
}

/// SQLite store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("parley.db"),
        }
    }
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trailing messages fed to the summarizer.
    pub summary_window: usize,
    /// Maximum history messages kept per session.
    pub history_limit: usize,
    /// Maximum events returned by one availability lookup.
    pub max_events: usize,
    /// Rule passages retrieved per rule lookup.
    pub rule_top_k: usize,
    /// Upper bound on any single handler before it is replaced by its fallback.
    pub stage_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            summary_window: 5,
            history_limit: 40,
            max_events: 5,
            rule_top_k: 3,
            stage_timeout_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for daily rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "parley=info".to_owned(),
            log_dir: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("parley"))
        .unwrap_or_else(|| PathBuf::from("/tmp/parley-data"))
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ParleyError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/parley/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("parley").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("parley")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/parley-config/config.toml")
        }
    }

    /// Check values that would make the server misbehave at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(ParleyError::Config(
                "audio.sample_rate and audio.channels must be positive".to_owned(),
            ));
        }
        if self.tts.chunk_bytes == 0 || self.tts.chunk_bytes % 2 != 0 {
            return Err(ParleyError::Config(
                "tts.chunk_bytes must be a positive even number".to_owned(),
            ));
        }
        if self.server.outbound_queue == 0 {
            return Err(ParleyError::Config(
                "server.outbound_queue must be positive".to_owned(),
            ));
        }
        if !self.server.path.starts_with('/') {
            return Err(ParleyError::Config(format!(
                "server.path must start with '/': {}",
                self.server.path
            )));
        }
        if self.pipeline.summary_window == 0 || self.pipeline.max_events == 0 {
            return Err(ParleyError::Config(
                "pipeline.summary_window and pipeline.max_events must be positive".to_owned(),
            ));
        }
        if self.stt.max_concurrent == 0 || self.tts.max_concurrent == 0 {
            return Err(ParleyError::Config(
                "stt.max_concurrent and tts.max_concurrent must be positive".to_owned(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for grant in &self.auth.tokens {
            if grant.token.trim().is_empty() || grant.subject.trim().is_empty() {
                return Err(ParleyError::Config(
                    "auth.tokens entries need a token and a subject".to_owned(),
                ));
            }
            if !seen.insert(grant.token.as_str()) {
                return Err(ParleyError::Config(format!(
                    "duplicate token for subject {}",
                    grant.subject
                )));
            }
        }
        Ok(())
    }
}
