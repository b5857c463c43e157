//! LRU eviction against a byte-size budget.
//!
//! Grounded on the teacher's `src/cache/mod.rs::cleanup_cache`, which sorts
//! entries by `cached_at` and drops the oldest fraction once a limit is
//! crossed. This version evicts one entry at a time, oldest `last_access`
//! first, skipping anything currently pinned by [`super::in_use::InUseSet`],
//! until the index is back under budget.

use std::path::PathBuf;

use super::in_use::InUseSet;
use super::index::CacheIndex;

pub struct EvictionEngine {
    cache_root: PathBuf,
    max_cache_size_bytes: u64,
}

impl EvictionEngine {
    pub fn new(cache_root: PathBuf, max_cache_size_bytes: u64) -> Self {
        Self {
            cache_root,
            max_cache_size_bytes,
        }
    }

    /// Call after any insertion that might have pushed the cache over budget.
    /// Returns the number of bytes actually freed.
    pub async fn maybe_evict(&self, index: &CacheIndex, in_use: &InUseSet) -> u64 {
        if index.total_size() <= self.max_cache_size_bytes {
            return 0;
        }

        let mut entries = index.snapshot();
        entries.sort_by_key(|(_, entry)| entry.last_access);
        let mut evicted_bytes = 0u64;

        for (fp, entry) in entries {
            if index.total_size() <= self.max_cache_size_bytes {
                break;
            }
            if in_use.contains(&fp) {
                continue;
            }

            let path = self.cache_root.join(&entry.relative_path);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    index.remove(&fp);
                    evicted_bytes += entry.size_bytes;
                    tracing::debug!(fingerprint = %fp, "evicted cache entry");
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    // Already gone on disk; drop the stale index entry too.
                    index.remove(&fp);
                }
                Err(err) => {
                    tracing::warn!(fingerprint = %fp, error = %err, "failed to evict cache entry");
                }
            }
        }

        if let Err(err) = index.persist().await {
            tracing::error!(error = %err, "failed to persist cache index after eviction");
        }

        evicted_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::fingerprint::Fingerprint;
    use crate::transcode::preset::QualityPreset;

    async fn write_file(dir: &std::path::Path, relative: &str, bytes: &[u8]) {
        let path = dir.join(relative);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, bytes).await.unwrap();
    }

    #[tokio::test]
    async fn evicts_oldest_entries_first_until_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let index = CacheIndex::load(dir.path().to_path_buf()).await.unwrap();
        let in_use = InUseSet::new();

        write_file(dir.path(), "high/old.m4a", &[0u8; 100]).await;
        write_file(dir.path(), "high/new.m4a", &[0u8; 100]).await;

        let old_fp = Fingerprint::cache("old", QualityPreset::High);
        let new_fp = Fingerprint::cache("new", QualityPreset::High);
        index.insert(old_fp.clone(), "high/old.m4a".into(), 100);
        // Ensure strictly increasing last_access ordering.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        index.insert(new_fp.clone(), "high/new.m4a".into(), 100);

        let engine = EvictionEngine::new(dir.path().to_path_buf(), 150);
        let evicted = engine.maybe_evict(&index, &in_use).await;

        assert_eq!(evicted, 100);
        assert!(index.get(&old_fp).is_none());
        assert!(index.get(&new_fp).is_some());
        assert!(index.total_size() <= 150);
    }

    #[tokio::test]
    async fn pinned_entries_are_never_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let index = CacheIndex::load(dir.path().to_path_buf()).await.unwrap();
        let in_use = InUseSet::new();

        write_file(dir.path(), "high/pinned.m4a", &[0u8; 200]).await;
        let fp = Fingerprint::cache("pinned", QualityPreset::High);
        index.insert(fp.clone(), "high/pinned.m4a".into(), 200);
        in_use.mark(fp.clone());

        let engine = EvictionEngine::new(dir.path().to_path_buf(), 10);
        let evicted = engine.maybe_evict(&index, &in_use).await;

        assert_eq!(evicted, 0);
        assert!(index.get(&fp).is_some());
    }
}
