//! Error types for Parley

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Parley
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The platform has no speech capture capability
    #[error("speech capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// Transient capture failure (permission, device hiccup)
    #[error("capture error: {0}")]
    Capture(String),

    /// The platform has no speech output capability
    #[error("speech synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Assistant did not answer within the deadline
    #[error("assistant timed out after {0}s")]
    AssistantTimeout(u64),

    /// Assistant could not be reached
    #[error("assistant transport error: {0}")]
    AssistantTransport(String),

    /// Assistant answered with an error status or malformed body
    #[error("assistant error: {0}")]
    Assistant(String),

    /// No active user session
    #[error("session error: {0}")]
    Session(String),

    /// Opening an external resource failed
    #[error("launch error: {0}")]
    Launch(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this is an expected failure of the assistant round trip
    #[must_use]
    pub const fn is_assistant_failure(&self) -> bool {
        matches!(
            self,
            Self::AssistantTimeout(_) | Self::AssistantTransport(_) | Self::Assistant(_)
        )
    }
}
