//! Parley: a spoken-language event concierge.
//!
//! Callers stream utterances over a WebSocket. Each utterance is
//! transcribed, split into intents, answered by one handler per intent
//! running concurrently, merged into one reply, summarized and spoken back:
//!
//! WebSocket → STT → classify → {handlers} → consolidate → summarize → TTS
//!
//! # Architecture
//!
//! - **Server** ([`server`]): `axum` WebSocket endpoint with token auth
//! - **STT** ([`stt`]): whisper.cpp command line
//! - **Pipeline** ([`pipeline`]): per-run stages plus the per-session
//!   coordinator that implements barge-in
//! - **LLM** ([`llm`]): any OpenAI-compatible chat completions endpoint
//! - **Store** ([`store`]): SQLite events, participants and rule documents
//! - **TTS** ([`tts`]): Piper command line, streamed as raw PCM chunks

pub mod auth;
pub mod config;
pub mod error;
pub mod form;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod store;
pub mod stt;
pub mod tts;

#[cfg(test)]
mod test_utils;

pub use config::ParleyConfig;
pub use error::{ParleyError, Result};
pub use pipeline::coordinator::{RunReport, SessionCoordinator};
pub use pipeline::run::Pipeline;
pub use server::AppState;
