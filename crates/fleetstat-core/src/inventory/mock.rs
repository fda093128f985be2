//! Scripted inventory for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{InventoryError, InventoryProvider, LabelSelector};
use crate::model::Endpoint;

/// Outcome of one scripted listing.
#[derive(Debug, Clone)]
pub enum MockListing {
    Endpoints(Vec<Endpoint>),
    Fail(String),
}

/// Inventory returning scripted listings in order.
///
/// The last listing repeats once the script is exhausted. Every call is
/// recorded with its start instant (tokio clock, so paused-time tests see
/// virtual time).
#[derive(Debug, Default)]
pub struct MockInventory {
    script: Mutex<VecDeque<MockListing>>,
    last: Mutex<Option<MockListing>>,
    delay: Duration,
    calls: Mutex<Vec<Instant>>,
}

impl MockInventory {
    /// Always returns `endpoints`.
    pub fn fixed(endpoints: Vec<Endpoint>) -> Self {
        Self::scripted(vec![MockListing::Endpoints(endpoints)])
    }

    /// Always fails.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::scripted(vec![MockListing::Fail(message.into())])
    }

    pub fn scripted(listings: Vec<MockListing>) -> Self {
        Self {
            script: Mutex::new(listings.into()),
            ..Default::default()
        }
    }

    /// Sleeps `delay` before answering, to simulate a slow inventory.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    fn next_listing(&self) -> Option<MockListing> {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(next) = script.pop_front() {
            *last = Some(next);
        }
        last.clone()
    }
}

#[async_trait]
impl InventoryProvider for MockInventory {
    async fn list_endpoints(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<Endpoint>, InventoryError> {
        self.calls.lock().unwrap().push(Instant::now());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_listing() {
            Some(MockListing::Endpoints(endpoints)) => Ok(endpoints
                .into_iter()
                .filter(|ep| selector.matches(&ep.labels))
                .collect()),
            Some(MockListing::Fail(msg)) => Err(InventoryError::Request(msg)),
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
