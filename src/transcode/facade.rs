//! `TranscodeService`: the single entry point the rest of the crate calls
//! into. Wires together the cache index, failure ledger, single-flight
//! registry, scheduler pools, probe oracle, codec selector and eviction
//! engine into the operations the spec describes.
//!
//! Grounded on the teacher's `AppState` composition pattern (`src/lib.rs`):
//! one struct holding `Arc`-wrapped subsystems, constructed once at startup
//! and cloned cheaply per request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::TranscodeConfig;
use crate::utils::metrics::Metrics;

use super::codec::CodecSelector;
use super::eviction::EvictionEngine;
use super::executor::{self, ConverterJob};
use super::failure::FailureLedger;
use super::fingerprint::Fingerprint;
use super::in_use::InUseSet;
use super::index::CacheIndex;
use super::preset::QualityPreset;
use super::probe::ProbeOracle;
use super::scheduler::Pools;
use super::single_flight::SingleFlightRegistry;

/// A completed, durable cache entry ready to be served.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mime_type: &'static str,
}

/// A one-shot file written outside the cache index; the caller owns its
/// lifecycle and should delete it once served.
#[derive(Debug, Clone)]
pub struct EphemeralFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mime_type: &'static str,
}

/// A live transcode in progress: bytes to stream now, plus a future that
/// resolves once the same run has also finished warming the cache.
pub struct LiveTranscode {
    pub bytes: mpsc::Receiver<Bytes>,
    pub mime_type: &'static str,
    pub eventual_file: super::single_flight::JoinedTranscode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Stream,
    Download,
}

pub struct TranscodeRequest<'a> {
    pub source: &'a Path,
    pub song_id: &'a str,
    pub preset: QualityPreset,
}

pub struct TranscodeService {
    config: TranscodeConfig,
    index: Arc<CacheIndex>,
    failures: Arc<FailureLedger>,
    in_use: Arc<InUseSet>,
    single_flight: Arc<SingleFlightRegistry>,
    pools: Pools,
    probe: ProbeOracle,
    codec: CodecSelector,
    eviction: Arc<EvictionEngine>,
    metrics: Arc<Metrics>,
    admission_lock: AsyncMutex<()>,
    persist_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl TranscodeService {
    pub async fn init(config: TranscodeConfig, metrics: Arc<Metrics>) -> std::io::Result<Arc<Self>> {
        let index = CacheIndex::load(config.cache_root.clone()).await?;
        let eviction = EvictionEngine::new(config.cache_root.clone(), config.max_cache_size_bytes);
        let probe = ProbeOracle::new(config.prober_path.clone());
        let codec = CodecSelector::new(config.converter_path.clone());
        let pools = Pools::new(config.max_streaming_concurrency, config.max_download_concurrency);
        let failures = FailureLedger::new(config.failure_backoff_window);

        let service = Arc::new(Self {
            config,
            index: Arc::new(index),
            failures: Arc::new(failures),
            in_use: Arc::new(InUseSet::new()),
            single_flight: Arc::new(SingleFlightRegistry::new()),
            pools,
            probe,
            codec,
            eviction: Arc::new(eviction),
            metrics,
            admission_lock: AsyncMutex::new(()),
            persist_task: AsyncMutex::new(None),
        });

        let handle = service.clone().spawn_persist_timer();
        *service.persist_task.lock().await = Some(handle);

        Ok(service)
    }

    fn index_handle(&self) -> Arc<CacheIndex> {
        self.index.clone()
    }

    fn failures_handle(&self) -> Arc<FailureLedger> {
        self.failures.clone()
    }

    fn single_flight_handle(&self) -> Arc<SingleFlightRegistry> {
        self.single_flight.clone()
    }

    fn eviction_handle(&self) -> Arc<EvictionEngine> {
        self.eviction.clone()
    }

    fn in_use_handle(&self) -> Arc<InUseSet> {
        self.in_use.clone()
    }

    fn spawn_persist_timer(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.index_persist_interval);
            loop {
                ticker.tick().await;
                if self.index.is_dirty() {
                    if let Err(err) = self.index.persist().await {
                        tracing::error!(error = %err, "periodic cache index persist failed");
                    }
                }
            }
        })
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.persist_task.lock().await.take() {
            handle.abort();
        }
        if let Err(err) = self.index.persist_sync() {
            tracing::error!(error = %err, "failed to persist cache index during shutdown");
        }
    }

    pub fn cache_size_bytes(&self) -> u64 {
        self.index.total_size()
    }

    /// Current occupancy of each scheduler pool, for the `/metrics` snapshot.
    pub fn pool_occupancy(&self) -> serde_json::Value {
        fn snapshot(pool: &super::scheduler::Pool) -> serde_json::Value {
            serde_json::json!({
                "name": pool.name(),
                "running": pool.running(),
                "max_concurrency": pool.max_concurrency(),
            })
        }
        serde_json::json!({
            "streaming": snapshot(&self.pools.streaming),
            "download": snapshot(&self.pools.download),
        })
    }

    pub fn mark_in_use(&self, song_id: &str, preset: QualityPreset) {
        self.in_use.mark(Fingerprint::cache(song_id, preset));
    }

    pub fn release_in_use(&self, song_id: &str, preset: QualityPreset) {
        self.in_use.release(&Fingerprint::cache(song_id, preset));
    }

    fn pool_for(&self, intent: Intent) -> &super::scheduler::Pool {
        match intent {
            Intent::Stream => &self.pools.streaming,
            Intent::Download => &self.pools.download,
        }
    }

    /// Returns a durable cached transcode if one exists or can be produced
    /// without exceeding scheduling limits. Absence at any stage — already
    /// cached but unavailable to produce right now — is not an error.
    pub async fn get_cached_transcode(&self, req: &TranscodeRequest<'_>, intent: Intent) -> Option<CachedFile> {
        if !req.preset.requires_transcoding() {
            return None;
        }
        if !self.codec.is_available().await {
            return None;
        }

        let fp = Fingerprint::cache(req.song_id, req.preset);

        if self.failures.should_skip(&fp) {
            tracing::debug!(
                song_id = req.song_id,
                preset = ?req.preset,
                last_failure = self.failures.last_failure_message(&fp).as_deref().unwrap_or("unknown"),
                "skipping cached transcode, recent failure still within backoff window"
            );
            return None;
        }

        if let Some(hit) = self.try_serve_from_cache(&fp, req.preset).await {
            return Some(hit);
        }
        self.metrics.record_cache_miss();

        let props = self.probe.probe(req.source).await;
        if self.probe.should_skip(&props, req.preset) {
            self.metrics.record_transcode_skipped();
            return None;
        }

        let pool = self.pool_for(intent);

        let joined = {
            let _guard = self.admission_lock.lock().await;
            if let Some(joined) = self.single_flight.try_join(&fp) {
                Some(joined)
            } else {
                None
            }
        };
        if let Some(joined) = joined {
            return joined.await;
        }

        let (tx, _shared) = {
            let _guard = self.admission_lock.lock().await;
            // Re-check: another task may have registered between the two locks.
            if let Some(joined) = self.single_flight.try_join(&fp) {
                return joined.await;
            }
            self.single_flight.register(fp.clone())
        };

        let permit = pool.acquire().await;
        let codec = self.codec.preferred_audio_codec().await;
        let final_path = self.config.cache_root.join(Fingerprint::relative_path(req.song_id, req.preset));

        let job = ConverterJob {
            converter_path: self.config.converter_path.clone(),
            source: req.source.to_path_buf(),
            codec,
            bitrate_kbps: req.preset.target_bitrate_kbps().unwrap_or(128),
            timeout: self.config.transcode_timeout,
        };

        self.metrics.record_transcode_started();
        let outcome = executor::run_to_file(job, &final_path).await;
        drop(permit);

        let result = match outcome {
            Ok(size_bytes) => {
                let relative_path = Fingerprint::relative_path(req.song_id, req.preset);
                self.index.insert(fp.clone(), relative_path, size_bytes);
                self.failures.clear(&fp);
                let evicted = self.eviction.maybe_evict(&self.index, &self.in_use).await;
                self.metrics.record_bytes_evicted(evicted);
                self.metrics.record_transcode_succeeded();
                Some(CachedFile {
                    path: final_path,
                    size_bytes,
                    mime_type: req.preset.mime_type(),
                })
            }
            Err(message) => {
                self.failures.record(fp.clone(), message);
                self.metrics.record_transcode_failed();
                None
            }
        };

        let _ = tx.send(result.clone());
        self.single_flight.complete(&fp);
        result
    }

    async fn try_serve_from_cache(&self, fp: &Fingerprint, preset: QualityPreset) -> Option<CachedFile> {
        let entry = self.index.get(fp)?;
        let path = self.config.cache_root.join(&entry.relative_path);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => {
                self.index.touch(fp);
                self.metrics.record_cache_hit();
                Some(CachedFile {
                    path,
                    size_bytes: metadata.len(),
                    mime_type: preset.mime_type(),
                })
            }
            Err(_) => {
                self.index.remove(fp);
                None
            }
        }
    }

    /// Produces a one-shot transcode outside the cache index. Always uses
    /// the download pool and is never single-flight-coalesced: each caller
    /// gets (and is responsible for) its own disposable file.
    pub async fn get_ephemeral_transcode(&self, req: &TranscodeRequest<'_>) -> Option<EphemeralFile> {
        if !req.preset.requires_transcoding() {
            return None;
        }
        if !self.codec.is_available().await {
            return None;
        }

        let fp = Fingerprint::download(req.song_id, req.preset);
        if self.failures.should_skip(&fp) {
            tracing::debug!(
                song_id = req.song_id,
                preset = ?req.preset,
                last_failure = self.failures.last_failure_message(&fp).as_deref().unwrap_or("unknown"),
                "skipping ephemeral transcode, recent failure still within backoff window"
            );
            return None;
        }

        let props = self.probe.probe(req.source).await;
        if self.probe.should_skip(&props, req.preset) {
            self.metrics.record_transcode_skipped();
            return None;
        }

        let _permit = self.pools.download.acquire().await;
        let codec = self.codec.preferred_audio_codec().await;

        let output_path = self
            .config
            .tmp_dir
            .join(format!("{}-{}-{}.{}", req.song_id, req.preset.name(), uuid::Uuid::new_v4(), req.preset.file_extension()));

        let job = ConverterJob {
            converter_path: self.config.converter_path.clone(),
            source: req.source.to_path_buf(),
            codec,
            bitrate_kbps: req.preset.target_bitrate_kbps().unwrap_or(128),
            timeout: self.config.transcode_timeout,
        };

        self.metrics.record_transcode_started();
        match executor::run_ephemeral(job, &output_path).await {
            Ok(size_bytes) => {
                self.failures.clear(&fp);
                self.metrics.record_transcode_succeeded();
                Some(EphemeralFile {
                    path: output_path,
                    size_bytes,
                    mime_type: req.preset.mime_type(),
                })
            }
            Err(message) => {
                self.failures.record(fp, message);
                self.metrics.record_transcode_failed();
                None
            }
        }
    }

    /// Starts a live, streamed transcode that simultaneously warms the
    /// cache. Returns absence on any conflict — the caller is expected to
    /// fall back to [`Self::get_cached_transcode`] or serve the original file.
    pub async fn start_live_transcode(&self, req: &TranscodeRequest<'_>) -> Option<LiveTranscode> {
        if !req.preset.requires_transcoding() {
            return None;
        }
        if !self.codec.is_available().await {
            return None;
        }

        let fp = Fingerprint::cache(req.song_id, req.preset);

        if self.failures.should_skip(&fp) {
            tracing::debug!(
                song_id = req.song_id,
                preset = ?req.preset,
                last_failure = self.failures.last_failure_message(&fp).as_deref().unwrap_or("unknown"),
                "skipping live transcode, recent failure still within backoff window"
            );
            return None;
        }
        if self.try_serve_from_cache(&fp, req.preset).await.is_some() {
            return None;
        }

        let props = self.probe.probe(req.source).await;
        if self.probe.should_skip(&props, req.preset) {
            self.metrics.record_transcode_skipped();
            return None;
        }

        let (permit, tx) = {
            let _guard = self.admission_lock.lock().await;
            if self.single_flight.try_join(&fp).is_some() {
                return None;
            }
            let permit = self.pools.streaming.try_acquire()?;
            let (tx, _shared) = self.single_flight.register(fp.clone());
            (permit, tx)
        };

        let codec = self.codec.preferred_audio_codec().await;
        let final_path = self.config.cache_root.join(Fingerprint::relative_path(req.song_id, req.preset));
        let job = ConverterJob {
            converter_path: self.config.converter_path.clone(),
            source: req.source.to_path_buf(),
            codec,
            bitrate_kbps: req.preset.target_bitrate_kbps().unwrap_or(128),
            timeout: self.config.transcode_timeout,
        };

        self.metrics.record_transcode_started();
        let handle = executor::spawn_tee(job, final_path.clone());

        let fp_for_completion = fp.clone();
        let relative_path = Fingerprint::relative_path(req.song_id, req.preset);
        let index = self.index_handle();
        let failures = self.failures_handle();
        let single_flight = self.single_flight_handle();
        let eviction = self.eviction_handle();
        let in_use = self.in_use_handle();
        let metrics = self.metrics.clone();
        let mime_type = req.preset.mime_type();

        tokio::spawn(async move {
            let outcome = handle.completion.await;
            let result = match outcome {
                Ok(Ok((path, size_bytes))) => {
                    index.insert(fp_for_completion.clone(), relative_path, size_bytes);
                    failures.clear(&fp_for_completion);
                    let evicted = eviction.maybe_evict(&index, &in_use).await;
                    metrics.record_bytes_evicted(evicted);
                    metrics.record_transcode_succeeded();
                    Some(CachedFile { path, size_bytes, mime_type })
                }
                Ok(Err(message)) => {
                    failures.record(fp_for_completion.clone(), message);
                    metrics.record_transcode_failed();
                    None
                }
                Err(_) => {
                    metrics.record_transcode_failed();
                    None
                }
            };
            let _ = tx.send(result);
            single_flight.complete(&fp_for_completion);
            drop(permit);
        });

        Some(LiveTranscode {
            bytes: handle.bytes,
            mime_type,
            eventual_file: self.single_flight.try_join(&fp).expect("just registered"),
        })
    }

    pub async fn invalidate_song(&self, song_id: &str) {
        for preset in QualityPreset::transcoded() {
            let fp = Fingerprint::cache(song_id, preset);
            if let Some(entry) = self.index.remove(&fp) {
                let path = self.config.cache_root.join(&entry.relative_path);
                let _ = tokio::fs::remove_file(&path).await;
            }
            self.failures.clear(&fp);
        }
        if let Err(err) = self.index.persist().await {
            tracing::error!(error = %err, "failed to persist cache index after invalidation");
        }
    }

    pub async fn clear_cache(&self) -> std::io::Result<()> {
        self.index.clear();
        self.in_use.clear();
        self.failures.clear_all();
        let _ = tokio::fs::remove_dir_all(&self.config.cache_root).await;
        tokio::fs::create_dir_all(&self.config.cache_root).await?;
        self.index.persist().await
    }
}
