//! fleetstat-core — fleet stats aggregation.
//!
//! Provides:
//! - `model` — endpoint, stat record and aggregate snapshot types
//! - `inventory` — fleet discovery (Kubernetes, file, mock) and readiness filtering
//! - `fetcher` — per-worker stat retrieval over HTTP
//! - `aggregator` — concurrent fan-out and aggregation
//! - `store` — the published snapshot
//! - `refresh` — the self-paced refresh loop
//!
//! With `api` feature the wire types derive OpenAPI schemas.

pub mod aggregator;
pub mod fetcher;
pub mod inventory;
pub mod model;
pub mod refresh;
pub mod store;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
