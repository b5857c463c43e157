//! Persisted cache index: fingerprint -> on-disk file metadata.
//!
//! Grounded on the teacher's `src/cache/mod.rs` (`FileCache` /
//! `Arc<RwLock<HashMap<PathBuf, FileMetadata>>>`) for the in-memory shape,
//! and on `src/config/mod.rs`'s atomic-write habits for the on-disk format.
//! Persists as `{cache_root}/cache_index.json`, written to a tempfile and
//! renamed into place so a crash mid-write never corrupts the index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::fingerprint::Fingerprint;

const INDEX_FILE_NAME: &str = "cache_index.json";
const INDEX_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub relative_path: String,
    pub size_bytes: u64,
    pub last_access: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFileEntry {
    path: String,
    size: u64,
    #[serde(rename = "lastAccess")]
    last_access: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: HashMap<String, IndexFileEntry>,
    #[serde(rename = "totalSize")]
    total_size: u64,
}

struct IndexState {
    entries: HashMap<Fingerprint, CacheEntry>,
    total_size: u64,
    dirty: bool,
}

pub struct CacheIndex {
    cache_root: PathBuf,
    state: RwLock<IndexState>,
}

impl CacheIndex {
    /// Loads the persisted index if present and well-formed; otherwise
    /// rebuilds it by walking the cache directory. A corrupt index is never
    /// fatal — the on-disk files remain the source of truth.
    pub async fn load(cache_root: PathBuf) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&cache_root).await?;

        let entries = match Self::read_index_file(&cache_root).await {
            Some(entries) => entries,
            None => Self::rebuild_from_disk(&cache_root).await?,
        };

        let total_size = entries.values().map(|e| e.size_bytes).sum();

        Ok(Self {
            cache_root,
            state: RwLock::new(IndexState {
                entries,
                total_size,
                dirty: false,
            }),
        })
    }

    async fn read_index_file(cache_root: &Path) -> Option<HashMap<Fingerprint, CacheEntry>> {
        let bytes = tokio::fs::read(cache_root.join(INDEX_FILE_NAME)).await.ok()?;
        let parsed: IndexFile = serde_json::from_slice(&bytes).ok()?;
        if parsed.version != INDEX_SCHEMA_VERSION {
            return None;
        }
        Some(
            parsed
                .entries
                .into_iter()
                .map(|(key, entry)| {
                    (
                        Fingerprint::from(key),
                        CacheEntry {
                            relative_path: entry.path,
                            size_bytes: entry.size,
                            last_access: entry.last_access,
                        },
                    )
                })
                .collect(),
        )
    }

    async fn rebuild_from_disk(cache_root: &Path) -> std::io::Result<HashMap<Fingerprint, CacheEntry>> {
        let mut entries = HashMap::new();
        let mut preset_dirs = tokio::fs::read_dir(cache_root).await?;
        while let Some(preset_dir) = preset_dirs.next_entry().await? {
            if !preset_dir.file_type().await?.is_dir() {
                continue;
            }
            let preset_name = preset_dir.file_name().to_string_lossy().into_owned();
            // `tmp/` holds ephemeral download output, never cache entries.
            if preset_name == "tmp" {
                continue;
            }
            let mut files = tokio::fs::read_dir(preset_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let metadata = file.metadata().await?;
                if !metadata.is_file() {
                    continue;
                }
                // Transient tempfiles from an interrupted tee/file transcode
                // are not a completed cache entry.
                if file.path().extension().and_then(|e| e.to_str()) == Some("tmp") {
                    continue;
                }
                let Some(song_id) = file.path().file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                    continue;
                };
                let key = Fingerprint::raw(&song_id, &preset_name);
                let relative_path = format!("{}/{}", preset_name, file.file_name().to_string_lossy());
                entries.insert(
                    key,
                    CacheEntry {
                        relative_path,
                        size_bytes: metadata.len(),
                        last_access: metadata
                            .modified()
                            .map(DateTime::<Utc>::from)
                            .unwrap_or_else(|_| Utc::now()),
                    },
                );
            }
        }
        Ok(entries)
    }

    pub fn get(&self, fp: &Fingerprint) -> Option<CacheEntry> {
        self.state.read().entries.get(fp).cloned()
    }

    pub fn touch(&self, fp: &Fingerprint) {
        let mut state = self.state.write();
        if let Some(entry) = state.entries.get_mut(fp) {
            entry.last_access = Utc::now();
            state.dirty = true;
        }
    }

    pub fn insert(&self, fp: Fingerprint, relative_path: String, size_bytes: u64) {
        let mut state = self.state.write();
        if let Some(previous) = state.entries.remove(&fp) {
            state.total_size = state.total_size.saturating_sub(previous.size_bytes);
        }
        state.total_size += size_bytes;
        state.entries.insert(
            fp,
            CacheEntry {
                relative_path,
                size_bytes,
                last_access: Utc::now(),
            },
        );
        state.dirty = true;
    }

    pub fn remove(&self, fp: &Fingerprint) -> Option<CacheEntry> {
        let mut state = self.state.write();
        let removed = state.entries.remove(fp);
        if let Some(entry) = &removed {
            state.total_size = state.total_size.saturating_sub(entry.size_bytes);
            state.dirty = true;
        }
        removed
    }

    pub fn total_size(&self) -> u64 {
        self.state.read().total_size
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    pub fn snapshot(&self) -> Vec<(Fingerprint, CacheEntry)> {
        self.state
            .read()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.total_size = 0;
        state.dirty = true;
    }

    pub async fn persist(&self) -> std::io::Result<()> {
        let serialized = self.serialize();
        let tmp_path = self.cache_root.join(format!("{INDEX_FILE_NAME}.tmp"));
        let final_path = self.cache_root.join(INDEX_FILE_NAME);
        tokio::fs::write(&tmp_path, &serialized).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        self.state.write().dirty = false;
        Ok(())
    }

    /// Blocking variant used only at shutdown, after the async runtime has
    /// stopped accepting new work.
    pub fn persist_sync(&self) -> std::io::Result<()> {
        let serialized = self.serialize();
        let tmp_path = self.cache_root.join(format!("{INDEX_FILE_NAME}.tmp"));
        let final_path = self.cache_root.join(INDEX_FILE_NAME);
        std::fs::write(&tmp_path, &serialized)?;
        std::fs::rename(&tmp_path, &final_path)?;
        self.state.write().dirty = false;
        Ok(())
    }

    fn serialize(&self) -> Vec<u8> {
        let state = self.state.read();
        let entries = state
            .entries
            .iter()
            .map(|(fp, entry)| {
                (
                    fp.as_str().to_string(),
                    IndexFileEntry {
                        path: entry.relative_path.clone(),
                        size: entry.size_bytes,
                        last_access: entry.last_access,
                    },
                )
            })
            .collect();
        let file = IndexFile {
            version: INDEX_SCHEMA_VERSION,
            entries,
            total_size: state.total_size,
        };
        serde_json::to_vec_pretty(&file).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::preset::QualityPreset;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index = CacheIndex::load(dir.path().to_path_buf()).await.unwrap();
        let fp = Fingerprint::cache("song-1", QualityPreset::High);
        index.insert(fp.clone(), "high/song-1.m4a".into(), 4096);
        let entry = index.get(&fp).unwrap();
        assert_eq!(entry.size_bytes, 4096);
        assert_eq!(index.total_size(), 4096);
    }

    #[tokio::test]
    async fn persist_and_reload_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fp = Fingerprint::cache("song-2", QualityPreset::Medium);
        {
            let index = CacheIndex::load(dir.path().to_path_buf()).await.unwrap();
            index.insert(fp.clone(), "medium/song-2.m4a".into(), 2048);
            index.persist().await.unwrap();
        }
        let reloaded = CacheIndex::load(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reloaded.get(&fp).unwrap().size_bytes, 2048);
        assert_eq!(reloaded.total_size(), 2048);
    }

    #[tokio::test]
    async fn remove_updates_total_size() {
        let dir = tempfile::tempdir().unwrap();
        let index = CacheIndex::load(dir.path().to_path_buf()).await.unwrap();
        let fp = Fingerprint::cache("song-3", QualityPreset::Low);
        index.insert(fp.clone(), "low/song-3.m4a".into(), 1024);
        index.remove(&fp);
        assert_eq!(index.total_size(), 0);
        assert!(index.get(&fp).is_none());
    }

    #[tokio::test]
    async fn corrupt_index_file_falls_back_to_disk_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("high")).await.unwrap();
        tokio::fs::write(dir.path().join("high/song-4.m4a"), b"fake-audio")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join(INDEX_FILE_NAME), b"{not valid json")
            .await
            .unwrap();

        let index = CacheIndex::load(dir.path().to_path_buf()).await.unwrap();
        let fp = Fingerprint::cache("song-4", QualityPreset::High);
        assert_eq!(index.get(&fp).unwrap().size_bytes, 10);
    }
}
