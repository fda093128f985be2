//! Data model shared by inventory, fetcher, aggregator and the query endpoint.
//!
//! `StatRecord` and `AggregateSnapshot` are wire types: their serialized field
//! names (`v`, `rps`, `t`, `servers`, `stats`) are the external contract.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of an inventory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A single worker as reported by the inventory.
///
/// Recomputed every cycle and never persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Endpoint {
    /// Inventory name of the worker (pod name, host name). Used in diagnostics only.
    #[serde(default)]
    pub name: String,
    /// Routable address. Empty when the inventory has not assigned one yet.
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>, phase: Phase) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            phase,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// An endpoint is eligible for fetching only when it is running and routable.
    pub fn is_ready(&self) -> bool {
        !self.address.is_empty() && self.phase == Phase::Running
    }
}

/// Per-worker statistics payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct StatRecord {
    /// Worker identity (build/version string).
    #[serde(rename = "v")]
    pub identity: String,
    /// Requests per second.
    #[serde(rename = "rps")]
    pub rate: f64,
    /// Total requests served.
    #[serde(rename = "t")]
    pub total_count: u64,
}

impl StatRecord {
    pub fn new(identity: impl Into<String>, rate: f64, total_count: u64) -> Self {
        Self {
            identity: identity.into(),
            rate,
            total_count,
        }
    }
}

/// One cycle's aggregate.
///
/// `server_count` is the number of ready endpoints seen this cycle and may
/// exceed `stats.len()` when fetches failed. `stats` is in completion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct AggregateSnapshot {
    /// Ready endpoints observed in the cycle.
    #[serde(rename = "servers")]
    pub server_count: usize,
    /// Successfully fetched records.
    pub stats: Vec<StatRecord>,
}

impl AggregateSnapshot {
    pub fn new(server_count: usize) -> Self {
        Self {
            server_count,
            stats: Vec::with_capacity(server_count),
        }
    }

    /// Serializes the snapshot to its published JSON form.
    pub fn encode(&self) -> Result<Bytes, SerializationError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| SerializationError(e.to_string()))
    }
}

/// The aggregate could not be encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializationError(pub String);

impl std::fmt::Display for SerializationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to encode snapshot: {}", self.0)
    }
}

impl std::error::Error for SerializationError {}
