//! Content-addressed cache of synthesized audio.
//!
//! Cache keyed by content (`DashMap`-backed, blake3 content hashing), built
//! as a filesystem cache with atomic writes and per-key single-flight,
//! since the cached artifact (a WAV file) must be handed to the
//! call-control bus by path rather than returned in-process.

use crate::ai::AiClient;
use crate::error::{AppError, AppResult};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Ensures synthesized audio for a piece of text exists on disk, by path.
pub struct TtsCache {
    ai: Arc<dyn AiClient>,
    cache_dir: PathBuf,
    /// Per-fingerprint lock guaranteeing at-most-one concurrent synthesis
    /// a miss takes the lock, double-checks the file, then synthesizes; a
    /// second concurrent miss for the same fingerprint blocks on the same
    /// lock and observes the first writer's result.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TtsCache {
    pub fn new(ai: Arc<dyn AiClient>, cache_dir: impl Into<PathBuf>) -> Self {
        Self { ai, cache_dir: cache_dir.into(), locks: DashMap::new() }
    }

    /// 12-hex-character content digest of the UTF-8 bytes of `text`.
    pub fn fingerprint(text: &str) -> String {
        let hash = blake3::hash(text.as_bytes());
        hash.to_hex()[..12].to_string()
    }

    /// The cache path for a fingerprint, independent of whether it exists.
    fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.cache_dir.join(format!("{fingerprint}.wav"))
    }

    /// Sound reference the call-control bus understands.
    pub fn sound_ref(fingerprint: &str) -> String {
        format!("sound:custom/{fingerprint}")
    }

    fn lock_for(&self, fingerprint: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn is_complete(path: &Path) -> bool {
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len() > 0,
            Err(_) => false,
        }
    }

    /// Ensure synthesized audio for `text` exists on disk, returning its
    /// path.
    pub async fn ensure_audio(&self, text: &str, use_cache: bool) -> AppResult<PathBuf> {
        let fingerprint = Self::fingerprint(text);
        let path = self.path_for(&fingerprint);

        if use_cache && Self::is_complete(&path).await {
            debug!(%fingerprint, "tts cache hit");
            return Ok(path);
        }

        let lock = self.lock_for(&fingerprint);
        let _guard = lock.lock().await;

        // Re-check under the lock: another task may have just finished
        // synthesizing this exact fingerprint.
        if use_cache && Self::is_complete(&path).await {
            debug!(%fingerprint, "tts cache hit after lock wait");
            return Ok(path);
        }

        debug!(%fingerprint, "tts cache miss, synthesizing");
        let audio = self.ai.synthesize(text).await?;

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let tmp_path = self.cache_dir.join(format!("{fingerprint}.wav.tmp"));
        tokio::fs::write(&tmp_path, &audio).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        Ok(path)
    }

    /// Pre-warm the cache for a fixed list of phrases at startup. Failures
    /// are logged but non-fatal.
    pub async fn prewarm(&self, phrases: &[String]) {
        for phrase in phrases {
            if let Err(e) = self.ensure_audio(phrase, true).await {
                warn!(error = %e, phrase = %phrase, "tts pre-warm failed, continuing");
            }
        }
    }
}

impl std::fmt::Debug for TtsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsCache")
            .field("cache_dir", &self.cache_dir)
            .field("entries_in_flight", &self.locks.len())
            .finish()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn fingerprint_is_always_12_lowercase_hex_chars(text in "\\PC{0,200}") {
            let fp = TtsCache::fingerprint(&text);
            prop_assert_eq!(fp.len(), 12);
            prop_assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }

        #[test]
        fn fingerprint_is_deterministic_for_any_text(text in "\\PC{0,200}") {
            let a = TtsCache::fingerprint(&text);
            let b = TtsCache::fingerprint(&text);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn sound_ref_always_wraps_the_fingerprint(fp in "[0-9a-f]{12}") {
            prop_assert_eq!(TtsCache::sound_ref(&fp), format!("sound:custom/{fp}"));
        }
    }
}
