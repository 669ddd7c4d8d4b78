//! Text-to-speech collaborator.
//!
//! Synthesis is lazy: [`Synthesizer::synthesize`] returns a stream of PCM16
//! LE chunks so the first chunk can be sent while the rest is still being
//! produced, and so a barge-in can stop delivery between any two chunks.

pub mod piper;

pub use piper::PiperCliSynthesizer;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::Result;

/// Lazily produced audio chunks.
pub type PcmStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Converts reply text into a chunked audio stream.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<PcmStream>;
}
