//! Text-to-speech adapter.
//!
//! Synthesis is a one-shot operation: text in, a finite non-restartable
//! stream of PCM chunks out. The stream always terminates with exactly
//! one `End` or `Error` item; consumers own the ordering and cleanup of
//! whatever they build from the chunks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::events::SynthesisEvent;

/// A streaming text-to-speech provider.
#[async_trait]
pub trait SynthesizerBackend: Send + Sync {
    /// Start synthesizing `text`; chunks arrive on the returned channel
    /// in playback order.
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<SynthesisEvent>>;
}

/// Adapter handing out synthesis runs.
#[derive(Clone)]
pub struct Synthesizer {
    backend: Arc<dyn SynthesizerBackend>,
}

impl Synthesizer {
    /// Create an adapter over the given backend.
    pub fn new(backend: Arc<dyn SynthesizerBackend>) -> Self {
        Self { backend }
    }

    /// Begin a synthesis run.
    pub async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<SynthesisEvent>> {
        self.backend.synthesize(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ChunkingBackend {
        chunk_size: usize,
        pcm: Vec<u8>,
    }

    #[async_trait]
    impl SynthesizerBackend for ChunkingBackend {
        async fn synthesize(&self, _text: &str) -> Result<mpsc::Receiver<SynthesisEvent>> {
            let (tx, rx) = mpsc::channel(16);
            let chunks: Vec<Vec<u8>> = self
                .pcm
                .chunks(self.chunk_size)
                .map(|c| c.to_vec())
                .collect();
            tokio::spawn(async move {
                for chunk in chunks {
                    if tx.send(SynthesisEvent::Chunk(chunk)).await.is_err() {
                        return;
                    }
                }
                let _ = tx.send(SynthesisEvent::End).await;
            });
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order_then_end() {
        let synthesizer = Synthesizer::new(Arc::new(ChunkingBackend {
            chunk_size: 4,
            pcm: (0u8..10).collect(),
        }));

        let mut rx = synthesizer.synthesize("hola").await.unwrap();
        let mut collected = Vec::new();
        let mut ended = false;
        while let Some(event) = rx.recv().await {
            match event {
                SynthesisEvent::Chunk(c) => collected.extend(c),
                SynthesisEvent::End => {
                    ended = true;
                    break;
                }
                SynthesisEvent::Error(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(ended);
        assert_eq!(collected, (0u8..10).collect::<Vec<_>>());
    }
}
