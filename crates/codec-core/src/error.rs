//! Error types for codec and framing operations.

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors produced while framing or parsing audio containers
#[derive(Error, Debug)]
pub enum CodecError {
    /// Buffer is too short to hold the expected header
    #[error("Truncated WAV header: need {needed} bytes, got {actual}")]
    TruncatedHeader { needed: usize, actual: usize },

    /// A RIFF/WAVE magic marker did not match
    #[error("Invalid WAV marker at offset {offset}: expected {expected}")]
    InvalidMarker { offset: usize, expected: &'static str },

    /// The container declares a format this crate does not handle
    #[error("Unsupported audio format tag: {format_tag} (only PCM is supported)")]
    UnsupportedFormat { format_tag: u16 },

    /// Declared data length disagrees with the buffer
    #[error("WAV data length mismatch: header declares {declared}, buffer holds {actual}")]
    DataLengthMismatch { declared: usize, actual: usize },
}

impl CodecError {
    /// Create a truncated header error
    pub fn truncated(needed: usize, actual: usize) -> Self {
        Self::TruncatedHeader { needed, actual }
    }

    /// Create an invalid marker error
    pub fn invalid_marker(offset: usize, expected: &'static str) -> Self {
        Self::InvalidMarker { offset, expected }
    }
}
