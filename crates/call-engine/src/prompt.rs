//! Scoped temporary store for synthesized prompt chunks.
//!
//! Each TTS chunk becomes a WAV file in a process-wide cache directory
//! under the OS temp dir. The switch receives an extension-less media
//! reference to the same path; artifacts are deleted as soon as their
//! playback finishes. Filenames are fresh UUIDs, so concurrent calls
//! never collide.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use voxgate_codec_core::wav;

use crate::error::Result;

/// Directory name under the OS temp dir.
const CACHE_DIR_NAME: &str = "ari-tts-cache";

/// One cached prompt chunk on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptArtifact {
    /// Absolute path of the WAV file
    pub path: PathBuf,

    /// Opaque media reference the switch dereferences
    pub media_uri: String,
}

/// Process-wide prompt cache.
#[derive(Debug, Clone)]
pub struct PromptCache {
    dir: PathBuf,
}

impl PromptCache {
    /// Create the cache directory under the OS temp dir.
    pub async fn init() -> Result<Self> {
        Self::with_dir(std::env::temp_dir().join(CACHE_DIR_NAME)).await
    }

    /// Create a cache rooted at an explicit directory.
    pub async fn with_dir(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "prompt cache ready");
        Ok(Self { dir })
    }

    /// Wrap a PCM chunk into a telephony WAV, write it under a unique
    /// name and return both the path and the media reference.
    pub async fn put(&self, pcm: &[u8]) -> Result<PromptArtifact> {
        let file_name = format!("{}.wav", Uuid::new_v4());
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, wav::wrap(pcm, wav::TELEPHONY_SPEC)).await?;

        // The switch resolves media by path without the extension.
        let media_uri = format!("sound:{}", path.with_extension("").display());
        Ok(PromptArtifact { path, media_uri })
    }

    /// Delete an artifact file. A file that is already gone is fine.
    pub async fn remove(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove prompt artifact");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_cache(tag: &str) -> PromptCache {
        let dir = std::env::temp_dir().join(format!("voxgate-test-cache-{tag}-{}", Uuid::new_v4()));
        PromptCache::with_dir(dir).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_writes_wav_with_media_ref() {
        let cache = temp_cache("put").await;
        let pcm = vec![1u8, 2, 3, 4];
        let artifact = cache.put(&pcm).await.unwrap();

        assert!(artifact.path.exists());
        assert!(artifact.media_uri.starts_with("sound:"));
        assert!(!artifact.media_uri.ends_with(".wav"));

        let bytes = tokio::fs::read(&artifact.path).await.unwrap();
        let (spec, data) = wav::parse(&bytes).unwrap();
        assert_eq!(spec, wav::TELEPHONY_SPEC);
        assert_eq!(data, &pcm[..]);
    }

    #[tokio::test]
    async fn test_put_issues_unique_paths() {
        let cache = temp_cache("unique").await;
        let a = cache.put(&[0u8; 8]).await.unwrap();
        let b = cache.put(&[0u8; 8]).await.unwrap();
        assert_ne!(a.path, b.path);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let cache = temp_cache("remove").await;
        let artifact = cache.put(&[0u8; 8]).await.unwrap();

        cache.remove(&artifact.path).await;
        assert!(!artifact.path.exists());
        // Removing again must not panic or error out
        cache.remove(&artifact.path).await;
    }
}
