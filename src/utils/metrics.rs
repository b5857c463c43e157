//! Process-lifetime counters for the transcoding subsystem, exposed over
//! `/metrics` as a JSON snapshot.
//!
//! Grounded on the teacher's `MetricsCollector` (atomic counters behind an
//! `Arc`, a `get_metrics()` snapshot method), trimmed of the per-file/per-IP
//! `RwLock<HashMap<...>>` breakdowns (there is no per-client identity in this
//! server) in favor of counters shaped around the transcode lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct Metrics {
    start_time: Instant,
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    transcodes_started: AtomicU64,
    transcodes_succeeded: AtomicU64,
    transcodes_failed: AtomicU64,
    transcodes_skipped: AtomicU64,
    bytes_evicted: AtomicU64,
    rate_limited_requests: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            transcodes_started: AtomicU64::new(0),
            transcodes_succeeded: AtomicU64::new(0),
            transcodes_failed: AtomicU64::new(0),
            transcodes_skipped: AtomicU64::new(0),
            bytes_evicted: AtomicU64::new(0),
            rate_limited_requests: AtomicU64::new(0),
        }
    }

    pub fn increment_requests(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rate_limited(&self) {
        self.rate_limited_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transcode_started(&self) {
        self.transcodes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transcode_succeeded(&self) {
        self.transcodes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transcode_failed(&self) {
        self.transcodes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transcode_skipped(&self) {
        self.transcodes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_evicted(&self, bytes: u64) {
        self.bytes_evicted.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> serde_json::Value {
        let uptime_seconds = self.start_time.elapsed().as_secs();
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);

        serde_json::json!({
            "uptime_seconds": uptime_seconds,
            "total_requests": total_requests,
            "rate_limited_requests": self.rate_limited_requests.load(Ordering::Relaxed),
            "cache_hits": cache_hits,
            "cache_misses": cache_misses,
            "cache_hit_ratio": if cache_hits + cache_misses > 0 {
                cache_hits as f64 / (cache_hits + cache_misses) as f64
            } else {
                0.0
            },
            "transcodes_started": self.transcodes_started.load(Ordering::Relaxed),
            "transcodes_succeeded": self.transcodes_succeeded.load(Ordering::Relaxed),
            "transcodes_failed": self.transcodes_failed.load(Ordering::Relaxed),
            "transcodes_skipped": self.transcodes_skipped.load(Ordering::Relaxed),
            "bytes_evicted": self.bytes_evicted.load(Ordering::Relaxed),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_ratio_reflects_hits_and_misses() {
        let metrics = Metrics::new();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot["cache_hits"], 2);
        assert_eq!(snapshot["cache_misses"], 1);
        assert!((snapshot["cache_hit_ratio"].as_f64().unwrap() - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn fresh_metrics_have_zero_hit_ratio() {
        let metrics = Metrics::new();
        assert_eq!(metrics.get_metrics()["cache_hit_ratio"], 0.0);
    }
}
