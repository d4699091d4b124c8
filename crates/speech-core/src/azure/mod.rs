//! Azure Speech provider backends.
//!
//! Synthesis goes through the regional REST endpoint; recognition uses
//! the streaming WebSocket protocol. Both declare the telephony format
//! the gateway works in: 8 kHz, 16-bit, mono PCM.

pub mod stt;
pub mod tts;

pub use stt::AzureRecognizer;
pub use tts::AzureSynthesizer;

use crate::error::{Result, SpeechError};

/// Credentials and per-language settings for the Azure Speech service.
#[derive(Debug, Clone)]
pub struct AzureSpeechConfig {
    /// Subscription key for the speech resource
    pub subscription_key: String,

    /// Azure region of the speech resource, e.g. `westeurope`
    pub region: String,

    /// Recognition language, e.g. `es-ES`
    pub stt_language: String,

    /// Synthesis language, e.g. `es-ES`
    pub tts_language: String,

    /// Synthesis voice name, e.g. `es-ES-ElviraNeural`
    pub tts_voice: String,

    /// Raw output format requested from synthesis,
    /// e.g. `raw-8khz-16bit-mono-pcm`
    pub tts_output_format: String,
}

impl AzureSpeechConfig {
    /// Reject configurations that cannot possibly authenticate.
    pub fn validate(&self) -> Result<()> {
        if self.subscription_key.trim().is_empty() {
            return Err(SpeechError::credentials("subscription key is empty"));
        }
        if self.region.trim().is_empty() {
            return Err(SpeechError::credentials("region is empty"));
        }
        Ok(())
    }
}
