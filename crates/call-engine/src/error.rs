//! Error taxonomy for the call engine.
//!
//! Startup problems are fatal; everything that happens once a call is
//! live degrades into a typed outcome instead of propagating, so that
//! session teardown always runs.

use thiserror::Error;

use crate::switch::SwitchError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by engine components
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid or missing process configuration, fatal at startup
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// A call-control operation against the switch failed
    #[error("Switch I/O error: {0}")]
    Switch(#[from] SwitchError),

    /// The RTP receive path failed (no free port, socket error)
    #[error("RTP error: {0}")]
    Rtp(#[from] voxgate_rtp_core::RtpError),

    /// A speech provider operation failed
    #[error("Speech error: {0}")]
    Speech(#[from] voxgate_speech_core::SpeechError),

    /// Interaction store failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem failure in the prompt cache or recording store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required script variable was absent
    #[error("Missing script variable: {name}")]
    MissingVariable { name: String },
}

impl EngineError {
    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a missing variable error
    pub fn missing_variable(name: impl Into<String>) -> Self {
        Self::MissingVariable { name: name.into() }
    }
}
