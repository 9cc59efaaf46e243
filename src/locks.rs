use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::types::VideoId;

/// One mutual-exclusion scope per video.
///
/// Annotation replacement and export regeneration of the same video run
/// under this lock; different videos never contend. Keyed by directory
/// name, the same key the frame store and dataset tree use.
#[derive(Debug, Default)]
pub struct VideoLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl VideoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock of `video_id`.
    pub fn with_video<T>(&self, video_id: &VideoId, f: impl FnOnce() -> T) -> T {
        // Clone the Arc out so the shard lock is released before blocking.
        let lock = self
            .locks
            .entry(video_id.dir_name())
            .or_default()
            .value()
            .clone();
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}
