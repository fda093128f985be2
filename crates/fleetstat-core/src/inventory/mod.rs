//! Fleet discovery.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │   InventoryProvider (trait)  │  list_endpoints(selector)
//! └──────────────┬───────────────┘
//!                │
//!     ┌──────────┼──────────────────┐
//!     │          │                  │
//! ┌───▼──────┐ ┌─▼─────────────┐ ┌──▼────────────┐
//! │Kubernetes│ │ FileInventory │ │ MockInventory │
//! │(in-clust)│ │ (JSON on disk)│ │  (testing)    │
//! └──────────┘ └───────────────┘ └───────────────┘
//! ```
//!
//! Providers return the raw listing. [`ready_endpoints`] applies the
//! readiness filter that decides which entries are fetched.

mod file;
mod kubernetes;
pub mod mock;
mod selector;

use async_trait::async_trait;
use tracing::debug;

use crate::model::Endpoint;

pub use file::FileInventory;
pub use kubernetes::{KubernetesInventory, TokenSource};
pub use mock::{MockInventory, MockListing};
pub use selector::{LabelSelector, SelectorError};

/// Error returned when the fleet listing could not be obtained.
#[derive(Debug)]
pub enum InventoryError {
    /// Provider is not configured correctly (missing environment, bad CA, ...).
    Config(String),
    /// Local file could not be read.
    Io(std::io::Error),
    /// Request to the inventory service failed.
    Request(String),
    /// Inventory service answered with a non-success status.
    Status(u16, String),
    /// Listing could not be decoded.
    Decode(String),
    /// Selector rejected by the provider.
    Selector(SelectorError),
}

impl std::fmt::Display for InventoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventoryError::Config(msg) => write!(f, "inventory config error: {}", msg),
            InventoryError::Io(e) => write!(f, "inventory I/O error: {}", e),
            InventoryError::Request(msg) => write!(f, "inventory request failed: {}", msg),
            InventoryError::Status(code, body) => {
                write!(f, "inventory returned HTTP {}: {}", code, body)
            }
            InventoryError::Decode(msg) => write!(f, "inventory decode error: {}", msg),
            InventoryError::Selector(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for InventoryError {}

impl From<std::io::Error> for InventoryError {
    fn from(e: std::io::Error) -> Self {
        InventoryError::Io(e)
    }
}

impl From<SelectorError> for InventoryError {
    fn from(e: SelectorError) -> Self {
        InventoryError::Selector(e)
    }
}

/// Source of the current fleet membership.
///
/// Called once per refresh cycle. Implementations must not filter on
/// readiness; that is done by [`ready_endpoints`].
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// Lists endpoints matching `selector`.
    async fn list_endpoints(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<Endpoint>, InventoryError>;

    /// Short provider name for logs.
    fn name(&self) -> &'static str;
}

/// Keeps only running endpoints with a routable address.
///
/// Dropped entries are not errors and are not counted.
pub fn ready_endpoints(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    endpoints
        .into_iter()
        .filter(|ep| {
            let ready = ep.is_ready();
            if !ready {
                debug!(name = %ep.name, address = %ep.address, phase = ?ep.phase, "skipping endpoint that is not ready");
            }
            ready
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;

    #[test]
    fn test_ready_endpoints_filters_phase_and_address() {
        let raw = vec![
            Endpoint::new("a", "10.0.0.1", Phase::Running),
            Endpoint::new("b", "", Phase::Running),
            Endpoint::new("c", "10.0.0.3", Phase::Pending),
            Endpoint::new("d", "10.0.0.4", Phase::Succeeded),
            Endpoint::new("e", "10.0.0.5", Phase::Running),
        ];
        let ready = ready_endpoints(raw);
        let names: Vec<_> = ready.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "e"]);
    }

    #[test]
    fn test_ready_endpoints_empty() {
        assert!(ready_endpoints(Vec::new()).is_empty());
    }

    #[test]
    fn test_error_display() {
        let e = InventoryError::Status(403, "forbidden".to_string());
        assert_eq!(e.to_string(), "inventory returned HTTP 403: forbidden");
        let e: InventoryError = LabelSelector::parse("=x").unwrap_err().into();
        assert!(e.to_string().starts_with("invalid label selector"));
    }
}
