//! Final per-call recordings.
//!
//! Two WAVs may be produced per call: the synthesized prompt audio and
//! the caller audio that was streamed to the recognizer. Both are
//! telephony format (8 kHz, 16-bit, mono) and named after the call.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::debug;

use voxgate_codec_core::wav;

use crate::error::Result;

/// Which leg of the call a recording captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingKind {
    /// The synthesized prompt as played to the caller
    Tts,
    /// The caller audio that went into the recognizer
    Stt,
}

impl RecordingKind {
    fn tag(self) -> &'static str {
        match self {
            Self::Tts => "tts",
            Self::Stt => "stt",
        }
    }
}

/// Writer for final call recordings.
#[derive(Debug, Clone)]
pub struct RecordingStore {
    tts_dir: PathBuf,
    stt_dir: PathBuf,
}

impl RecordingStore {
    /// Ensure the recording directories exist under `root`.
    pub async fn init(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let tts_dir = root.join("tts");
        let stt_dir = root.join("stt");
        tokio::fs::create_dir_all(&tts_dir).await?;
        tokio::fs::create_dir_all(&stt_dir).await?;
        Ok(Self { tts_dir, stt_dir })
    }

    /// Write one recording, returning the path of the WAV.
    pub async fn save(
        &self,
        kind: RecordingKind,
        unique_id: &str,
        caller_id: &str,
        pcm: &[u8],
    ) -> Result<PathBuf> {
        let timestamp = Utc::now()
            .to_rfc3339_opts(SecondsFormat::Secs, true)
            .replace(':', "-");
        let file_name = format!(
            "{}_{}_{}_{}.wav",
            sanitize(unique_id),
            sanitize(caller_id),
            timestamp,
            kind.tag()
        );
        let dir = match kind {
            RecordingKind::Tts => &self.tts_dir,
            RecordingKind::Stt => &self.stt_dir,
        };
        let path = dir.join(file_name);
        tokio::fs::write(&path, wav::wrap(pcm, wav::TELEPHONY_SPEC)).await?;
        debug!(path = %path.display(), bytes = pcm.len(), "recording written");
        Ok(path)
    }
}

/// Channel ids contain slashes; keep filenames flat.
fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
