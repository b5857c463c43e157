//! Cache-key identity for a (song, preset) pair.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::preset::QualityPreset;

/// Identifies one cacheable unit of work. Two requests with the same
/// fingerprint are the same logical transcode and must be coalesced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint for a durable cache entry (`get_cached_transcode` / `start_live_transcode`).
    pub fn cache(song_id: &str, preset: QualityPreset) -> Self {
        Fingerprint(format!("{song_id}_{}", preset.name()))
    }

    /// Fingerprint used only for failure-ledger bookkeeping of one-shot ephemeral work.
    pub fn download(song_id: &str, preset: QualityPreset) -> Self {
        Fingerprint(format!("{song_id}_{}_download", preset.name()))
    }

    /// Builds a cache fingerprint from its raw parts, e.g. when rebuilding
    /// the index from a `{preset}/{song_id}.ext` directory layout on disk.
    pub fn raw(song_id: &str, preset_name: &str) -> Self {
        Fingerprint(format!("{song_id}_{preset_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative path under the cache root a cache-fingerprint's file would live at.
    pub fn relative_path(song_id: &str, preset: QualityPreset) -> String {
        format!("{}/{}.{}", preset.name(), song_id, preset.file_extension())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(raw: String) -> Self {
        Fingerprint(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_and_download_fingerprints_differ() {
        let cache = Fingerprint::cache("song-1", QualityPreset::High);
        let download = Fingerprint::download("song-1", QualityPreset::High);
        assert_ne!(cache, download);
    }

    #[test]
    fn same_song_and_preset_is_same_fingerprint() {
        let a = Fingerprint::cache("song-1", QualityPreset::Medium);
        let b = Fingerprint::cache("song-1", QualityPreset::Medium);
        assert_eq!(a, b);
    }

    #[test]
    fn different_preset_is_different_fingerprint() {
        let a = Fingerprint::cache("song-1", QualityPreset::Low);
        let b = Fingerprint::cache("song-1", QualityPreset::High);
        assert_ne!(a, b);
    }
}
