//! Tracks fingerprints currently being read by a caller so the eviction
//! engine never deletes a file out from under an in-flight response.

use std::collections::HashSet;

use parking_lot::Mutex;

use super::fingerprint::Fingerprint;

#[derive(Default)]
pub struct InUseSet(Mutex<HashSet<Fingerprint>>);

impl InUseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, fp: Fingerprint) {
        self.0.lock().insert(fp);
    }

    pub fn release(&self, fp: &Fingerprint) {
        self.0.lock().remove(fp);
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.0.lock().contains(fp)
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::preset::QualityPreset;

    #[test]
    fn marked_fingerprint_is_reported_in_use() {
        let set = InUseSet::new();
        let fp = Fingerprint::cache("song-1", QualityPreset::High);
        set.mark(fp.clone());
        assert!(set.contains(&fp));
        set.release(&fp);
        assert!(!set.contains(&fp));
    }
}
