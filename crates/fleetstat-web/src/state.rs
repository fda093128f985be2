//! Shared application state and global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use fleetstat_core::store::SnapshotStore;

/// State handed to every request handler. Read-only: the refresh loop is the
/// only writer of the store.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<SnapshotStore>,
}

impl AppState {
    pub(crate) fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }
}
