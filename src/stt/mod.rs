//! Speech-to-text collaborator.
//!
//! A connection hands each inbound utterance (16-bit little-endian PCM) to a
//! [`Transcriber`]. The production engine shells out to whisper.cpp
//! ([`WhisperCliTranscriber`]).

pub mod whisper;

pub use whisper::WhisperCliTranscriber;

use async_trait::async_trait;

use crate::error::Result;

/// Result of transcribing one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Recognised text, possibly still carrying engine annotations.
    pub text: String,
    /// `false` when the engine ran but produced nothing usable.
    pub success: bool,
}

impl Transcript {
    pub fn recognised(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
        }
    }

    pub fn failed() -> Self {
        Self {
            text: String::new(),
            success: false,
        }
    }
}

/// Converts one utterance of PCM16 LE audio into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Transcript>;
}

/// Decode 16-bit little-endian PCM. A trailing odd byte is ignored.
pub fn pcm16_le_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Strip engine annotations such as `[BLANK_AUDIO]`, `(music)` or `{noise}`
/// and collapse whitespace. An empty result means nothing was said.
pub fn clean_transcript(raw: &str) -> String {
    let mut kept = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth = depth.saturating_sub(1),
            c if depth == 0 => kept.push(c),
            _ => {}
        }
    }
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}
