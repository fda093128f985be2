//! Holder of the most recently published snapshot.
//!
//! Single writer (the refresh loop), many readers (query handlers). The
//! serialized document is swapped wholesale, so a reader sees either the
//! previous or the new snapshot, never a mix.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use bytes::Bytes;

#[derive(Default)]
pub struct SnapshotStore {
    current: ArcSwapOption<Bytes>,
    published: AtomicU64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the published snapshot.
    pub fn publish(&self, data: Bytes) {
        self.current.store(Some(Arc::new(data)));
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Current snapshot, or `None` before the first publish. Never blocks.
    pub fn current(&self) -> Option<Bytes> {
        self.current.load_full().map(|data| Bytes::clone(&data))
    }

    /// Number of successful publishes since start.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("published", &self.published_count())
            .field("bytes", &self.current().map(|b| b.len()))
            .finish()
    }
}
