//! Backoff bookkeeping for fingerprints that have recently failed to transcode.
//!
//! A fixed-window circuit breaker, not a persisted store: restart clears it.
//! Grounded on the teacher's preference for `parking_lot::Mutex` over
//! `std::sync::Mutex` for small, synchronous, frequently-hit critical sections
//! (see `src/cache/mod.rs`'s `Arc<RwLock<HashMap<...>>>` pattern).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::fingerprint::Fingerprint;

#[derive(Debug, Clone)]
struct FailureRecord {
    last_failure: Instant,
    message: String,
}

pub struct FailureLedger {
    backoff_window: Duration,
    records: Mutex<HashMap<Fingerprint, FailureRecord>>,
}

impl FailureLedger {
    pub fn new(backoff_window: Duration) -> Self {
        Self {
            backoff_window,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// True if this fingerprint failed recently enough that it should be
    /// treated as absent rather than retried. An expired record is dropped
    /// on the way out so a stale entry never lingers past its window.
    pub fn should_skip(&self, fp: &Fingerprint) -> bool {
        let mut records = self.records.lock();
        match records.get(fp) {
            Some(record) if record.last_failure.elapsed() < self.backoff_window => true,
            Some(_) => {
                records.remove(fp);
                false
            }
            None => false,
        }
    }

    pub fn record(&self, fp: Fingerprint, message: impl Into<String>) {
        self.records.lock().insert(
            fp,
            FailureRecord {
                last_failure: Instant::now(),
                message: message.into(),
            },
        );
    }

    pub fn last_failure_message(&self, fp: &Fingerprint) -> Option<String> {
        self.records.lock().get(fp).map(|r| r.message.clone())
    }

    pub fn clear(&self, fp: &Fingerprint) {
        self.records.lock().remove(fp);
    }

    pub fn clear_all(&self) {
        self.records.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::preset::QualityPreset;
    use std::thread::sleep;

    #[test]
    fn fresh_failure_is_skipped_within_window() {
        let ledger = FailureLedger::new(Duration::from_secs(60));
        let fp = Fingerprint::cache("song-1", QualityPreset::High);
        ledger.record(fp.clone(), "converter exited 1");
        assert!(ledger.should_skip(&fp));
    }

    #[test]
    fn failure_expires_after_window() {
        let ledger = FailureLedger::new(Duration::from_millis(10));
        let fp = Fingerprint::cache("song-1", QualityPreset::High);
        ledger.record(fp.clone(), "timeout");
        sleep(Duration::from_millis(20));
        assert!(!ledger.should_skip(&fp));
    }

    #[test]
    fn clear_removes_record_immediately() {
        let ledger = FailureLedger::new(Duration::from_secs(60));
        let fp = Fingerprint::cache("song-1", QualityPreset::Low);
        ledger.record(fp.clone(), "oom");
        ledger.clear(&fp);
        assert!(!ledger.should_skip(&fp));
    }
}
