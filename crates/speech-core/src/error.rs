//! Error types for speech operations.

use thiserror::Error;

/// Result type alias for speech operations
pub type Result<T> = std::result::Result<T, SpeechError>;

/// Errors surfaced by recognizer and synthesizer adapters
#[derive(Error, Debug)]
pub enum SpeechError {
    /// The provider rejected the request or dropped the session
    #[error("Speech provider error: {reason}")]
    Provider { reason: String },

    /// HTTP transport failure talking to the synthesis endpoint
    #[error("Synthesis transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport failure on the recognition stream
    #[error("Recognition transport error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The session is already closed
    #[error("Speech session is closed")]
    SessionClosed,

    /// Provider credentials are missing or malformed
    #[error("Invalid speech credentials: {reason}")]
    Credentials { reason: String },
}

impl SpeechError {
    /// Create a provider error
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider {
            reason: reason.into(),
        }
    }

    /// Create a credentials error
    pub fn credentials(reason: impl Into<String>) -> Self {
        Self::Credentials {
            reason: reason.into(),
        }
    }
}
