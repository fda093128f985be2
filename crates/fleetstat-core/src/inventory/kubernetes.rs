//! Kubernetes pod inventory.
//!
//! Lists pods of one namespace through the API server using the pod's
//! service-account credentials. Only the fields needed to build an
//! [`Endpoint`] are decoded.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{InventoryError, InventoryProvider, LabelSelector};
use crate::model::{Endpoint, Phase};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the bearer token comes from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// Re-read from disk on every request (projected tokens are rotated).
    File(PathBuf),
    Static(String),
    None,
}

impl TokenSource {
    async fn load(&self) -> Result<Option<String>, InventoryError> {
        match self {
            TokenSource::File(path) => {
                let token = tokio::fs::read_to_string(path).await.map_err(|e| {
                    InventoryError::Config(format!("read token {}: {}", path.display(), e))
                })?;
                Ok(Some(token.trim().to_string()))
            }
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::None => Ok(None),
        }
    }
}

/// Pod inventory backed by the Kubernetes API.
#[derive(Debug, Clone)]
pub struct KubernetesInventory {
    client: reqwest::Client,
    base_url: String,
    namespace: String,
    token: TokenSource,
}

impl KubernetesInventory {
    /// Builds a provider from the in-cluster environment
    /// (`KUBERNETES_SERVICE_HOST`/`PORT` and the mounted service account).
    pub fn in_cluster(namespace: impl Into<String>) -> Result<Self, InventoryError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| InventoryError::Config("KUBERNETES_SERVICE_HOST not set".to_string()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")
            .map_err(|_| InventoryError::Config("KUBERNETES_SERVICE_PORT not set".to_string()))?;
        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host
        };

        let sa_dir = PathBuf::from(SERVICE_ACCOUNT_DIR);
        let ca_path = sa_dir.join("ca.crt");
        let ca = std::fs::read(&ca_path).map_err(|e| {
            InventoryError::Config(format!("read CA bundle {}: {}", ca_path.display(), e))
        })?;
        let ca = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| InventoryError::Config(format!("invalid CA bundle: {}", e)))?;
        let client = reqwest::Client::builder()
            .add_root_certificate(ca)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InventoryError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("https://{}:{}", host, port),
            namespace: namespace.into(),
            token: TokenSource::File(sa_dir.join("token")),
        })
    }

    /// Builds a provider talking to an explicit API server URL.
    pub fn with_base_url(
        base_url: impl Into<String>,
        namespace: impl Into<String>,
        token: TokenSource,
    ) -> Result<Self, InventoryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InventoryError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            namespace: namespace.into(),
            token,
        })
    }

    fn pods_url(&self) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.base_url, self.namespace)
    }
}

#[async_trait]
impl InventoryProvider for KubernetesInventory {
    async fn list_endpoints(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<Endpoint>, InventoryError> {
        let mut request = self.client.get(self.pods_url());
        if !selector.is_everything() {
            request = request.query(&[("labelSelector", selector.to_string())]);
        }
        if let Some(token) = self.token.load().await? {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InventoryError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| InventoryError::Request(e.to_string()))?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(InventoryError::Status(
                status.as_u16(),
                text.chars().take(256).collect(),
            ));
        }

        let list: PodList =
            serde_json::from_slice(&body).map_err(|e| InventoryError::Decode(e.to_string()))?;
        Ok(list.items.into_iter().map(Endpoint::from).collect())
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}

// ============================================================
// Wire types (subset of core/v1 PodList)
// ============================================================

#[derive(Debug, Default, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Default, Deserialize)]
struct Pod {
    #[serde(default)]
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default, rename = "podIP")]
    pod_ip: String,
    #[serde(default)]
    phase: Phase,
}

impl From<Pod> for Endpoint {
    fn from(pod: Pod) -> Self {
        Endpoint {
            name: pod.metadata.name,
            address: pod.status.pod_ip,
            phase: pod.status.phase,
            labels: pod.metadata.labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use std::collections::HashMap;

    const POD_LIST: &str = r#"{
        "kind": "PodList",
        "items": [
            {"metadata": {"name": "web-1", "labels": {"app": "web"}},
             "status": {"phase": "Running", "podIP": "10.1.0.4"}},
            {"metadata": {"name": "web-2", "labels": {"app": "web"}},
             "status": {"phase": "Pending"}},
            {"metadata": {"name": "web-3"}}
        ]
    }"#;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_decode_pod_list() {
        let list: PodList = serde_json::from_str(POD_LIST).unwrap();
        let endpoints: Vec<Endpoint> = list.items.into_iter().map(Endpoint::from).collect();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[0].address, "10.1.0.4");
        assert_eq!(endpoints[0].phase, Phase::Running);
        assert_eq!(endpoints[0].labels.get("app").map(String::as_str), Some("web"));
        assert!(endpoints[1].address.is_empty());
        assert_eq!(endpoints[2].phase, Phase::Unknown);
    }

    #[tokio::test]
    async fn test_list_sends_selector_and_token() {
        let app = Router::new().route(
            "/api/v1/namespaces/workers/pods",
            get(
                |Query(q): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    if auth != "Bearer secret" {
                        return (StatusCode::UNAUTHORIZED, String::new());
                    }
                    if q.get("labelSelector").map(String::as_str) != Some("app=web") {
                        return (StatusCode::BAD_REQUEST, String::new());
                    }
                    (StatusCode::OK, POD_LIST.to_string())
                },
            ),
        );
        let base = serve(app).await;

        let inv = KubernetesInventory::with_base_url(
            &base,
            "workers",
            TokenSource::Static("secret".to_string()),
        )
        .unwrap();
        let sel = LabelSelector::parse("app = web").unwrap();
        let endpoints = inv.list_endpoints(&sel).await.unwrap();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[0].name, "web-1");
    }

    #[tokio::test]
    async fn test_list_error_status() {
        let app = Router::new().route(
            "/api/v1/namespaces/default/pods",
            get(|| async { (StatusCode::FORBIDDEN, "pods is forbidden") }),
        );
        let base = serve(app).await;

        let inv = KubernetesInventory::with_base_url(&base, "default", TokenSource::None).unwrap();
        let err = inv
            .list_endpoints(&LabelSelector::everything())
            .await
            .unwrap_err();
        match err {
            InventoryError::Status(code, body) => {
                assert_eq!(code, 403);
                assert_eq!(body, "pods is forbidden");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_list_token_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let inv = KubernetesInventory::with_base_url(
            "http://127.0.0.1:1",
            "default",
            TokenSource::File(dir.path().join("token")),
        )
        .unwrap();
        let err = inv
            .list_endpoints(&LabelSelector::everything())
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::Config(_)));
    }
}
