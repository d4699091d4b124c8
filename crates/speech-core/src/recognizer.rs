//! Push-stream recognizer adapter.
//!
//! A [`Recognizer`] opens provider sessions; each [`RecognizerSession`]
//! is a push stream the caller writes 8 kHz / 16-bit / mono PCM into.
//! The adapter pumps raw [`ProviderEvent`]s in a background task,
//! accumulates finalized hypothesis segments, and resolves the whole
//! session into a single terminal [`RecognizerEvent::Ended`] carrying
//! the segments joined by single spaces.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, SpeechError};
use crate::events::{ProviderEvent, RecognizerEvent};

/// Channel capacity for audio pushed toward a provider.
pub(crate) const AUDIO_CHANNEL_CAPACITY: usize = 256;

/// What a backend hands the adapter for one streaming session.
pub struct ProviderSession {
    /// Push stream toward the provider. Closing it requests a graceful
    /// stop; the provider answers with `SessionStopped` once the tail of
    /// the audio has been processed.
    pub audio_tx: mpsc::Sender<Vec<u8>>,

    /// Raw provider events, ending in `SessionStopped` or `Canceled`.
    pub events_rx: mpsc::Receiver<ProviderEvent>,
}

/// A streaming speech-to-text provider.
///
/// Implementations declare 8 kHz / 16-bit / mono PCM input when opening
/// the session; the adapter never resamples.
#[async_trait]
pub trait RecognizerBackend: Send + Sync {
    /// Open one streaming session.
    async fn open(&self) -> Result<ProviderSession>;
}

/// Factory handing out recognizer sessions for calls.
#[derive(Clone)]
pub struct Recognizer {
    backend: Arc<dyn RecognizerBackend>,
}

impl Recognizer {
    /// Create an adapter over the given backend.
    pub fn new(backend: Arc<dyn RecognizerBackend>) -> Self {
        Self { backend }
    }

    /// Open a session and start the event pump.
    ///
    /// The returned receiver yields `Ready` once the provider accepts
    /// audio and is guaranteed to yield at most one `Ended`.
    pub async fn start(&self) -> Result<(RecognizerSession, mpsc::Receiver<RecognizerEvent>)> {
        let provider = self.backend.open().await?;
        let (events_tx, events_rx) = mpsc::channel(64);

        tokio::spawn(pump(provider.events_rx, events_tx));

        Ok((
            RecognizerSession {
                audio_tx: Some(provider.audio_tx),
            },
            events_rx,
        ))
    }
}

/// One push stream toward the provider.
///
/// At most one of these exists per call; the session owner is the only
/// writer, which serializes writes by construction.
pub struct RecognizerSession {
    audio_tx: Option<mpsc::Sender<Vec<u8>>>,
}

impl RecognizerSession {
    /// Forward PCM bytes to the provider.
    pub async fn write(&self, pcm: Vec<u8>) -> Result<()> {
        match &self.audio_tx {
            Some(tx) => tx.send(pcm).await.map_err(|_| SpeechError::SessionClosed),
            None => Err(SpeechError::SessionClosed),
        }
    }

    /// Request graceful termination.
    ///
    /// Closes the push stream; the provider drains buffered audio and
    /// eventually reports `SessionStopped`, which surfaces as the
    /// terminal `Ended` event. Calling this twice is harmless.
    pub fn stop(&mut self) {
        self.audio_tx.take();
    }

    /// True once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.audio_tx.is_none()
    }
}

/// Translate raw provider events into the consumer-facing set.
async fn pump(
    mut provider_rx: mpsc::Receiver<ProviderEvent>,
    events_tx: mpsc::Sender<RecognizerEvent>,
) {
    let mut finals: Vec<String> = Vec::new();
    let mut ended = false;

    while let Some(event) = provider_rx.recv().await {
        if ended {
            debug!(?event, "ignoring provider event after session end");
            continue;
        }
        match event {
            ProviderEvent::SessionStarted => {
                if events_tx.send(RecognizerEvent::Ready).await.is_err() {
                    return;
                }
            }
            ProviderEvent::Hypothesis(text) => {
                if events_tx.send(RecognizerEvent::Partial(text)).await.is_err() {
                    return;
                }
            }
            ProviderEvent::Recognized(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    finals.push(trimmed.to_string());
                }
            }
            ProviderEvent::SessionStopped => {
                ended = true;
                let transcript = finals.join(" ").trim().to_string();
                debug!(%transcript, "recognition session ended");
                if events_tx
                    .send(RecognizerEvent::Ended(transcript))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            ProviderEvent::Canceled(reason) => {
                warn!(%reason, "recognition session canceled by provider");
                if events_tx.send(RecognizerEvent::Error(reason)).await.is_err() {
                    return;
                }
            }
        }
    }
}
