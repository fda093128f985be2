//! Fan-out fetch and aggregation.
//!
//! One task per ready endpoint, no concurrency cap: the fleet is small and a
//! cycle is bounded by the per-fetch timeout, not by the number of workers.
//! Successful records are appended to a mutex-guarded accumulator in
//! completion order; failures are logged and skipped.

use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::fetcher::StatFetcher;
use crate::model::{AggregateSnapshot, Endpoint, StatRecord};

pub struct Aggregator {
    fetcher: Arc<dyn StatFetcher>,
}

impl Aggregator {
    pub fn new(fetcher: Arc<dyn StatFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetches every endpoint concurrently and waits for all of them.
    ///
    /// `server_count` is `endpoints.len()`; `stats` holds only successful
    /// fetches, so `stats.len() <= server_count`.
    pub async fn aggregate(&self, endpoints: Vec<Endpoint>) -> AggregateSnapshot {
        let server_count = endpoints.len();
        let accumulator: Arc<Mutex<Vec<StatRecord>>> =
            Arc::new(Mutex::new(Vec::with_capacity(server_count)));

        let mut tasks = JoinSet::new();
        for endpoint in endpoints {
            let fetcher = Arc::clone(&self.fetcher);
            let accumulator = Arc::clone(&accumulator);
            tasks.spawn(async move {
                match fetcher.fetch(&endpoint).await {
                    Ok(record) => {
                        accumulator
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .push(record);
                    }
                    Err(e) => {
                        warn!(
                            name = %endpoint.name,
                            address = %endpoint.address,
                            error = %e,
                            "failed to fetch worker stats"
                        );
                    }
                }
            });
        }

        // Barrier: every branch reaches a terminal state before we read the accumulator.
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "fetch task panicked");
            }
        }

        let stats = std::mem::take(
            &mut *accumulator
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        AggregateSnapshot {
            server_count,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchError, MockFetcher, MockOutcome};
    use crate::model::Phase;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ep(addr: &str) -> Endpoint {
        Endpoint::new(format!("pod-{}", addr), addr, Phase::Running)
    }

    #[tokio::test]
    async fn test_aggregate_empty() {
        let agg = Aggregator::new(Arc::new(MockFetcher::new()));
        let snap = agg.aggregate(Vec::new()).await;
        assert_eq!(snap, AggregateSnapshot::new(0));
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let fetcher = MockFetcher::new()
            .with("10.0.0.1", MockOutcome::Record(StatRecord::new("1.0", 10.5, 100)))
            .with(
                "10.0.0.2",
                MockOutcome::Fail(FetchError::Decode("bad".to_string())),
            )
            .with("10.0.0.3", MockOutcome::Record(StatRecord::new("1.0", 5.0, 50)));
        let agg = Aggregator::new(Arc::new(fetcher));

        let snap = agg
            .aggregate(vec![ep("10.0.0.1"), ep("10.0.0.2"), ep("10.0.0.3"), ep("10.0.0.4")])
            .await;
        assert_eq!(snap.server_count, 4);
        assert_eq!(snap.stats.len(), 2);
        assert!(snap.stats.contains(&StatRecord::new("1.0", 10.5, 100)));
        assert!(snap.stats.contains(&StatRecord::new("1.0", 5.0, 50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_in_completion_order() {
        let fetcher = MockFetcher::new()
            .with(
                "slow",
                MockOutcome::Delayed(Duration::from_millis(300), StatRecord::new("slow", 1.0, 1)),
            )
            .with(
                "fast",
                MockOutcome::Delayed(Duration::from_millis(10), StatRecord::new("fast", 2.0, 2)),
            );
        let agg = Aggregator::new(Arc::new(fetcher));

        let snap = agg.aggregate(vec![ep("slow"), ep("fast")]).await;
        let ids: Vec<_> = snap.stats.iter().map(|s| s.identity.as_str()).collect();
        assert_eq!(ids, vec!["fast", "slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_run_concurrently() {
        let mut fetcher = MockFetcher::new();
        let mut endpoints = Vec::new();
        for i in 0..20 {
            let addr = format!("10.0.1.{}", i);
            fetcher = fetcher.with(
                addr.clone(),
                MockOutcome::Delayed(Duration::from_secs(1), StatRecord::new("1.0", 1.0, i)),
            );
            endpoints.push(ep(&addr));
        }
        let agg = Aggregator::new(Arc::new(fetcher));

        let start = tokio::time::Instant::now();
        let snap = agg.aggregate(endpoints).await;
        assert_eq!(snap.stats.len(), 20);
        // Sequential fetching would take 20s.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_hanging_fetch() {
        let fetcher = MockFetcher::new()
            .with("ok", MockOutcome::Record(StatRecord::new("1.0", 1.0, 1)))
            .with("hang", MockOutcome::Hang(Duration::from_secs(2)));
        let agg = Aggregator::new(Arc::new(fetcher));

        let start = tokio::time::Instant::now();
        let snap = agg.aggregate(vec![ep("ok"), ep("hang")]).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(snap.server_count, 2);
        assert_eq!(snap.stats.len(), 1);
    }

    struct PanickingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StatFetcher for PanickingFetcher {
        async fn fetch(&self, endpoint: &Endpoint) -> Result<StatRecord, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if endpoint.address == "boom" {
                panic!("worker decoder exploded");
            }
            Ok(StatRecord::new("1.0", 1.0, 1))
        }
    }

    #[tokio::test]
    async fn test_panicking_fetch_does_not_abort_cycle() {
        let fetcher = Arc::new(PanickingFetcher {
            calls: AtomicUsize::new(0),
        });
        let agg = Aggregator::new(fetcher.clone());

        let snap = agg.aggregate(vec![ep("a"), ep("boom"), ep("b")]).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(snap.server_count, 3);
        assert_eq!(snap.stats.len(), 2);
    }
}
