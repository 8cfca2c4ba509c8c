use crate::types::DetectionRecord;
use std::sync::Arc;

/// Detections from the most recent full cycle.
///
/// Contents are swapped wholesale by each full cycle; skipped frames only
/// ever take snapshots.
#[derive(Debug, Clone, Default)]
pub struct DetectionCache {
    records: Arc<[DetectionRecord]>,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached records. An empty `records` clears the cache.
    pub fn replace(&mut self, records: Vec<DetectionRecord>) {
        self.records = records.into();
    }

    /// Cheap shared handle to the current records.
    pub fn snapshot(&self) -> Arc<[DetectionRecord]> {
        Arc::clone(&self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
