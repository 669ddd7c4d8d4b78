//! Message types passed between the pipeline and the connection.

use serde::Serialize;

/// Sent when an utterance has been received and transcription began.
pub const TRANSCRIPTION_STARTED: &str = "TRANSCRIPTION_STARTED";
/// Prefix of the echo of a cleaned transcript.
pub const TRANSCRIPT_PREFIX: &str = "TRANSCRIPT::";
/// Tells the client to stop playing audio from a preempted reply.
pub const CANCEL_AUDIO: &str = "CANCEL_AUDIO";
/// Prefix of the reply text, sent before its audio.
pub const AI_RESPONSE_PREFIX: &str = "AI_RESPONSE::";
/// Sent after the last audio chunk of a committed reply.
pub const RESPONSE_COMPLETE: &str = "RESPONSE_COMPLETE";

/// A frame queued for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Control marker or prefixed text.
    Text(String),
    /// One chunk of PCM16 LE reply audio.
    Audio(Vec<u8>),
}

impl OutboundFrame {
    pub fn marker(marker: &str) -> Self {
        Self::Text(marker.to_owned())
    }

    pub fn transcript(text: &str) -> Self {
        Self::Text(format!("{TRANSCRIPT_PREFIX}{text}"))
    }

    pub fn ai_response(text: &str) -> Self {
        Self::Text(format!("{AI_RESPONSE_PREFIX}{text}"))
    }

    /// Text payload, if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Audio(_) => None,
        }
    }
}

/// Observable state of a session's pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    /// An utterance is being transcribed and no run is in flight.
    AwaitingTranscription,
    Classifying,
    /// Intent handlers are running concurrently.
    FanOutRunning,
    /// Contributions are being merged into one reply.
    Consolidating,
    /// The reply is being voiced and delivered.
    Synthesizing,
}
