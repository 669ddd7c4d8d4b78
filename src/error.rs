//! Error types for the parley pipeline.

/// Top-level error type for the voice concierge.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Completion service error (transport, HTTP status, malformed body).
    #[error("LLM error: {0}")]
    Llm(String),

    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Event, participant or rule storage error.
    #[error("store error: {0}")]
    Store(String),

    /// Token verification error.
    #[error("auth error: {0}")]
    Auth(String),

    /// Pipeline coordination error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl From<rusqlite::Error> for ParleyError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_stage_prefix() {
        let err = ParleyError::Llm("HTTP 500: boom".to_owned());
        assert_eq!(err.to_string(), "LLM error: HTTP 500: boom");
    }

    #[test]
    fn sqlite_errors_map_to_store() {
        let err: ParleyError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, ParleyError::Store(_)));
    }
}
