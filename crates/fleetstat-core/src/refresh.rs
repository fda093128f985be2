//! Refresh loop: discover → fetch → aggregate → publish, on a fixed cadence.
//!
//! The sleep after each cycle is `interval - elapsed`, so cycle start times
//! stay regular however long a cycle took. An overrunning cycle is followed
//! immediately by the next one.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::inventory::{InventoryError, InventoryProvider, LabelSelector, ready_endpoints};
use crate::model::SerializationError;
use crate::store::SnapshotStore;

/// A cycle that published nothing. The previous snapshot stays in place.
#[derive(Debug)]
pub enum CycleError {
    Inventory(InventoryError),
    Serialization(SerializationError),
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleError::Inventory(e) => write!(f, "{}", e),
            CycleError::Serialization(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CycleError {}

impl From<InventoryError> for CycleError {
    fn from(e: InventoryError) -> Self {
        CycleError::Inventory(e)
    }
}

impl From<SerializationError> for CycleError {
    fn from(e: SerializationError) -> Self {
        CycleError::Serialization(e)
    }
}

/// Outcome of a published cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    /// Ready endpoints (the published `servers` value).
    pub ready: usize,
    pub fetched: usize,
    pub failed: usize,
    /// Size of the published document.
    pub bytes: usize,
}

/// How long to sleep after a cycle that took `elapsed`. Zero on overrun.
pub fn pacing_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Owns everything one cycle touches.
pub struct Refresher {
    inventory: Arc<dyn InventoryProvider>,
    selector: LabelSelector,
    aggregator: Aggregator,
    store: Arc<SnapshotStore>,
}

impl Refresher {
    pub fn new(
        inventory: Arc<dyn InventoryProvider>,
        selector: LabelSelector,
        aggregator: Aggregator,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            inventory,
            selector,
            aggregator,
            store,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Runs one cycle. Publishes only on success.
    pub async fn run_cycle(&self) -> Result<CycleSummary, CycleError> {
        let listed = self.inventory.list_endpoints(&self.selector).await?;
        let listed_count = listed.len();
        let endpoints = ready_endpoints(listed);
        debug!(
            provider = self.inventory.name(),
            listed = listed_count,
            ready = endpoints.len(),
            "inventory listed"
        );

        let snapshot = self.aggregator.aggregate(endpoints).await;
        let data = snapshot.encode()?;
        let summary = CycleSummary {
            ready: snapshot.server_count,
            fetched: snapshot.stats.len(),
            failed: snapshot.server_count - snapshot.stats.len(),
            bytes: data.len(),
        };
        self.store.publish(data);
        Ok(summary)
    }

    /// Runs cycles for the lifetime of the process.
    pub async fn run(self, interval: Duration) {
        let mut cycles: u64 = 0;
        loop {
            let start = Instant::now();
            let result = self.run_cycle().await;
            let elapsed = start.elapsed();
            cycles += 1;

            match result {
                Ok(summary) if self.store.published_count() == 1 => {
                    info!(
                        duration_ms = elapsed.as_millis() as u64,
                        servers = summary.ready,
                        fetched = summary.fetched,
                        failed = summary.failed,
                        "first snapshot published"
                    );
                }
                Ok(summary) => {
                    debug!(
                        duration_ms = elapsed.as_millis() as u64,
                        servers = summary.ready,
                        fetched = summary.fetched,
                        failed = summary.failed,
                        bytes = summary.bytes,
                        cycles,
                        "snapshot updated"
                    );
                }
                Err(e) => {
                    error!(
                        duration_ms = elapsed.as_millis() as u64,
                        error = %e,
                        "refresh cycle failed, keeping previous snapshot"
                    );
                }
            }

            let delay = pacing_delay(interval, elapsed);
            if delay.is_zero() {
                warn!(
                    duration_ms = elapsed.as_millis() as u64,
                    interval_ms = interval.as_millis() as u64,
                    "refresh cycle overran interval"
                );
                // Let other tasks on this worker run before the next cycle.
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
