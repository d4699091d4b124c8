//! Azure text-to-speech over the regional REST endpoint.
//!
//! One POST per prompt. The response body is the raw audio in the
//! requested output format; it is forwarded chunk by chunk as the
//! transfer progresses, so playback of the first chunk can start while
//! the tail is still being synthesized.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::azure::AzureSpeechConfig;
use crate::error::Result;
use crate::events::SynthesisEvent;
use crate::synthesis::SynthesizerBackend;

/// Streaming synthesizer backed by the Azure TTS REST API.
pub struct AzureSynthesizer {
    http: reqwest::Client,
    config: AzureSpeechConfig,
}

impl AzureSynthesizer {
    /// Create a backend; fails when credentials are obviously unusable.
    pub fn new(config: AzureSpeechConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            http: reqwest::Client::new(),
            config,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
            self.config.region
        )
    }
}

#[async_trait]
impl SynthesizerBackend for AzureSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<SynthesisEvent>> {
        let (tx, rx) = mpsc::channel(32);
        let http = self.http.clone();
        let url = self.endpoint();
        let config = self.config.clone();
        let ssml = build_ssml(&config.tts_language, &config.tts_voice, text);

        tokio::spawn(async move {
            let response = http
                .post(&url)
                .header("Ocp-Apim-Subscription-Key", &config.subscription_key)
                .header("Content-Type", "application/ssml+xml")
                .header("X-Microsoft-OutputFormat", &config.tts_output_format)
                .header("User-Agent", "voxgate")
                .body(ssml)
                .send()
                .await;

            let response = match response {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    warn!(status = %r.status(), "synthesis request rejected");
                    let _ = tx
                        .send(SynthesisEvent::Error(format!(
                            "synthesis request rejected: {}",
                            r.status()
                        )))
                        .await;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "synthesis request failed");
                    let _ = tx.send(SynthesisEvent::Error(e.to_string())).await;
                    return;
                }
            };

            let mut total = 0usize;
            let mut stream = response.bytes_stream();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) if bytes.is_empty() => {}
                    Ok(bytes) => {
                        total += bytes.len();
                        if tx.send(SynthesisEvent::Chunk(bytes.to_vec())).await.is_err() {
                            // Consumer abandoned the prompt mid-stream.
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(SynthesisEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }
            debug!(bytes = total, "synthesis stream complete");
            let _ = tx.send(SynthesisEvent::End).await;
        });

        Ok(rx)
    }
}

/// Build the SSML document for one prompt.
fn build_ssml(language: &str, voice: &str, text: &str) -> String {
    format!(
        "<speak version='1.0' xml:lang='{language}'><voice xml:lang='{language}' name='{voice}'>{}</voice></speak>",
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
