//! Inventory backed by a JSON file on disk.
//!
//! The file holds an array of endpoints and is re-read on every call, so it
//! can be rewritten by an external process between cycles:
//!
//! ```json
//! [
//!   {"name": "w1", "address": "10.0.0.1", "phase": "Running", "labels": {"app": "web"}},
//!   {"name": "w2", "address": "10.0.0.2", "phase": "Pending"}
//! ]
//! ```

use std::path::PathBuf;

use async_trait::async_trait;

use super::{InventoryError, InventoryProvider, LabelSelector};
use crate::model::Endpoint;

/// Reads the fleet from a local JSON file and applies the selector locally.
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl InventoryProvider for FileInventory {
    async fn list_endpoints(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<Endpoint>, InventoryError> {
        let data = tokio::fs::read(&self.path).await?;
        let endpoints: Vec<Endpoint> = serde_json::from_slice(&data).map_err(|e| {
            InventoryError::Decode(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(endpoints
            .into_iter()
            .filter(|ep| selector.matches(&ep.labels))
            .collect())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
