//! Per-worker stat retrieval.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{Endpoint, StatRecord};

/// Default port workers expose their stats on.
pub const DEFAULT_WORKER_PORT: u16 = 8080;
/// Default stats path on each worker.
pub const DEFAULT_WORKER_PATH: &str = "/api/stats";
/// Default per-fetch timeout. Bounds the duration of a whole cycle.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(2);
/// Largest stats body accepted from a worker.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Error fetching a single worker's stats.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// No response within the fetch timeout.
    Timeout,
    /// Connection or protocol failure.
    Request(String),
    /// Response body could not be read.
    Body(String),
    /// Body is not a valid stat record.
    Decode(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Timeout => write!(f, "timed out"),
            FetchError::Request(msg) => write!(f, "request failed: {}", msg),
            FetchError::Body(msg) => write!(f, "error reading body: {}", msg),
            FetchError::Decode(msg) => write!(f, "error decoding stats: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

/// Fetches one worker's stat record.
#[async_trait]
pub trait StatFetcher: Send + Sync {
    async fn fetch(&self, endpoint: &Endpoint) -> Result<StatRecord, FetchError>;
}

/// Where and how long to fetch. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    pub port: u16,
    pub path: String,
    pub timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_WORKER_PORT,
            path: DEFAULT_WORKER_PATH.to_string(),
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl FetchConfig {
    /// Stats URL for `address`. IPv6 literals are bracketed.
    pub fn url_for(&self, address: &str) -> String {
        let host = if address.contains(':') && !address.starts_with('[') {
            format!("[{}]", address)
        } else {
            address.to_string()
        };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("http://{}:{}{}", host, self.port, path)
    }
}

/// HTTP fetcher. One shared connection pool for all workers.
///
/// The response status is not inspected: whatever body the worker returns
/// must decode as a [`StatRecord`]. Bodies larger than
/// [`FetchConfig::max_body_bytes`] are rejected without being buffered.
#[derive(Debug, Clone)]
pub struct HttpStatFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl HttpStatFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl StatFetcher for HttpStatFetcher {
    async fn fetch(&self, endpoint: &Endpoint) -> Result<StatRecord, FetchError> {
        let url = self.config.url_for(&endpoint.address);
        let mut response = self.client.get(&url).send().await?;

        let limit = self.config.max_body_bytes;
        if let Some(len) = response.content_length().filter(|&len| len > limit as u64) {
            return Err(too_large(len as usize, limit));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(body_error)? {
            if body.len() + chunk.len() > limit {
                return Err(too_large(body.len() + chunk.len(), limit));
            }
            body.extend_from_slice(&chunk);
        }
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

fn body_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Body(e.to_string())
    }
}

fn too_large(size: usize, limit: usize) -> FetchError {
    FetchError::Body(format!("body exceeds {} bytes (got at least {})", limit, size))
}

// ============================================================
// Mock
// ============================================================

/// Scripted behaviour of one worker address.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Record(StatRecord),
    Fail(FetchError),
    /// Responds with the record after a delay.
    Delayed(Duration, StatRecord),
    /// Never answers within `timeout`; fails with [`FetchError::Timeout`] after it.
    Hang(Duration),
}

/// Fetcher answering from a per-address script. Unknown addresses fail.
#[derive(Debug, Clone, Default)]
pub struct MockFetcher {
    outcomes: HashMap<String, MockOutcome>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: impl Into<String>, outcome: MockOutcome) -> Self {
        self.outcomes.insert(address.into(), outcome);
        self
    }
}

#[async_trait]
impl StatFetcher for MockFetcher {
    async fn fetch(&self, endpoint: &Endpoint) -> Result<StatRecord, FetchError> {
        match self.outcomes.get(&endpoint.address) {
            Some(MockOutcome::Record(r)) => Ok(r.clone()),
            Some(MockOutcome::Fail(e)) => Err(e.clone()),
            Some(MockOutcome::Delayed(d, r)) => {
                tokio::time::sleep(*d).await;
                Ok(r.clone())
            }
            Some(MockOutcome::Hang(timeout)) => {
                tokio::time::sleep(*timeout).await;
                Err(FetchError::Timeout)
            }
            None => Err(FetchError::Request(format!(
                "connection refused: {}",
                endpoint.address
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;
    use axum::Router;
    use axum::routing::get;

    async fn serve(app: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    fn fetcher(port: u16, timeout: Duration) -> HttpStatFetcher {
        HttpStatFetcher::new(FetchConfig {
            port,
            path: DEFAULT_WORKER_PATH.to_string(),
            timeout,
            ..Default::default()
        })
        .unwrap()
    }

    fn local() -> Endpoint {
        Endpoint::new("w", "127.0.0.1", Phase::Running)
    }

    #[test]
    fn test_url_for() {
        let cfg = FetchConfig::default();
        assert_eq!(cfg.url_for("10.0.0.1"), "http://10.0.0.1:8080/api/stats");
        assert_eq!(cfg.url_for("fd00::1"), "http://[fd00::1]:8080/api/stats");
        let cfg = FetchConfig {
            port: 9000,
            path: "metrics".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.url_for("host"), "http://host:9000/metrics");
    }

    #[tokio::test]
    async fn test_fetch_valid_record() {
        let app = Router::new().route(
            "/api/stats",
            get(|| async { r#"{"v":"1.0","rps":10.5,"t":100}"# }),
        );
        let port = serve(app).await;

        let rec = fetcher(port, Duration::from_secs(2))
            .fetch(&local())
            .await
            .unwrap();
        assert_eq!(rec, StatRecord::new("1.0", 10.5, 100));
    }

    #[tokio::test]
    async fn test_fetch_malformed_body() {
        let app = Router::new().route("/api/stats", get(|| async { "not json" }));
        let port = serve(app).await;

        let err = fetcher(port, Duration::from_secs(2))
            .fetch(&local())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_decode_failure() {
        let port = serve(Router::new()).await;

        let err = fetcher(port, Duration::from_secs(2))
            .fetch(&local())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let app = Router::new().route(
            "/api/stats",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                r#"{"v":"1.0","rps":1.0,"t":1}"#
            }),
        );
        let port = serve(app).await;

        let err = fetcher(port, Duration::from_millis(100))
            .fetch(&local())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout);
    }

    #[tokio::test]
    async fn test_fetch_oversized_body_rejected() {
        let app = Router::new().route(
            "/api/stats",
            get(|| async { "x".repeat(DEFAULT_MAX_BODY_BYTES + 1) }),
        );
        let port = serve(app).await;

        let err = fetcher(port, Duration::from_secs(2))
            .fetch(&local())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Body(_)));
    }

    #[tokio::test]
    async fn test_fetch_body_over_small_limit() {
        let app = Router::new().route(
            "/api/stats",
            get(|| async { r#"{"v":"1.0","rps":10.5,"t":100}"# }),
        );
        let port = serve(app).await;

        let fetcher = HttpStatFetcher::new(FetchConfig {
            port,
            max_body_bytes: 8,
            ..Default::default()
        })
        .unwrap();
        let err = fetcher.fetch(&local()).await.unwrap_err();
        assert!(matches!(err, FetchError::Body(_)));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = fetcher(port, Duration::from_secs(2))
            .fetch(&local())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
    }
}
