//! Coalesces concurrent requests for the same fingerprint onto one in-flight
//! transcode, so N simultaneous callers trigger exactly one converter run.
//!
//! Built on `futures::future::Shared`, already in the teacher's dependency
//! stack (`futures`/`futures-util`), combined with a `tokio::sync::oneshot`
//! so the eventual leader can resolve every follower with one `send`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::facade::CachedFile;
use super::fingerprint::Fingerprint;

pub type JoinedTranscode = Shared<Pin<Box<dyn Future<Output = Option<CachedFile>> + Send>>>;

#[derive(Default)]
pub struct SingleFlightRegistry {
    inflight: Mutex<HashMap<Fingerprint, JoinedTranscode>>,
}

impl SingleFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// If a transcode for this fingerprint is already running, returns a
    /// clone of the shared future any number of followers can await.
    pub fn try_join(&self, fp: &Fingerprint) -> Option<JoinedTranscode> {
        self.inflight.lock().get(fp).cloned()
    }

    /// Registers the caller as the leader for `fp`. Returns a sender the
    /// leader must eventually complete with the outcome, and the same
    /// shared future handed to any followers that join in the meantime.
    pub fn register(&self, fp: Fingerprint) -> (oneshot::Sender<Option<CachedFile>>, JoinedTranscode) {
        let (tx, rx) = oneshot::channel();
        let fut: Pin<Box<dyn Future<Output = Option<CachedFile>> + Send>> =
            Box::pin(async move { rx.await.unwrap_or(None) });
        let shared = fut.shared();
        self.inflight.lock().insert(fp, shared.clone());
        (tx, shared)
    }

    /// Removes the bookkeeping entry once the leader has resolved it. Callers
    /// that already cloned the shared future keep working regardless.
    pub fn complete(&self, fp: &Fingerprint) {
        self.inflight.lock().remove(fp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::preset::QualityPreset;

    #[tokio::test]
    async fn follower_sees_leaders_result() {
        let registry = SingleFlightRegistry::new();
        let fp = Fingerprint::cache("song-1", QualityPreset::High);

        let (tx, leader_fut) = registry.register(fp.clone());
        let follower_fut = registry.try_join(&fp).expect("leader should be registered");

        let expected = CachedFile {
            path: "high/song-1.m4a".into(),
            size_bytes: 1234,
            mime_type: "audio/mp4",
        };
        tx.send(Some(expected.clone())).unwrap();
        registry.complete(&fp);

        assert_eq!(leader_fut.await, Some(expected.clone()));
        assert_eq!(follower_fut.await, Some(expected));
    }

    #[tokio::test]
    async fn no_join_target_when_nothing_in_flight() {
        let registry = SingleFlightRegistry::new();
        let fp = Fingerprint::cache("song-2", QualityPreset::Low);
        assert!(registry.try_join(&fp).is_none());
    }
}
