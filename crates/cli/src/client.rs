//! API client for the opsgate HTTP surface

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Failure reported by the gateway itself
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("API response carried no data: {0}")]
    MissingData(String),
}

/// Response envelope shared by every `/api` route
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, ClientError> {
        self.data.ok_or(ClientError::MissingData(self.message))
    }
}

/// API client for the gateway
pub struct ApiClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        // Keep any path prefix when joining relative routes
        let mut base_url = Url::parse(base_url).context("Invalid API URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    /// GET a route and return its `data`
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        let envelope: Envelope<T> = self.send(self.client.get(url)).await?;
        Ok(envelope.into_data()?)
    }

    /// POST a JSON body and return the response `data`
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        let envelope: Envelope<T> = self.send(self.client.post(url).json(body)).await?;
        Ok(envelope.into_data()?)
    }

    /// GET a route that answers with a message only
    pub async fn get_message(&self, path: &str) -> Result<String> {
        let url = self.base_url.join(path).context("Invalid path")?;
        let envelope: Envelope<serde_json::Value> = self.send(self.client.get(url)).await?;
        Ok(envelope.message)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Envelope<T>> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Envelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|e| e.error.or(Some(e.message)))
                .unwrap_or(body);
            return Err(ClientError::Api { status, message }.into());
        }

        response.json().await.context("Failed to parse response")
    }
}

// API request types

#[derive(Debug, Clone, Serialize)]
pub struct TargetRequest {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScaleRequest {
    #[serde(flatten)]
    pub target: TargetRequest,
    pub replicas: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateRequest {
    #[serde(flatten)]
    pub target: TargetRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    #[serde(flatten)]
    pub target: TargetRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedChange {
    pub name: String,
    pub namespace: String,
    pub operation: String,
    pub attempts: u32,
    pub detail: ChangeDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeDetail {
    Scaled { from: i32, to: i32 },
    Restarted { restarted_at: String },
    Updated { images: Vec<String> },
    RolledBack { revision: String, images: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    pub name: String,
    pub namespace: String,
    pub desired: i32,
    pub replicas: i32,
    pub available: i32,
    pub ready: i32,
    pub updated: i32,
    pub unavailable: i32,
    #[serde(default)]
    pub conditions: Vec<WorkloadCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseCounts {
    pub total: usize,
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
    pub succeeded: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCounts {
    pub total: usize,
    pub ready: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInventory {
    pub nodes: NodeCounts,
    pub pods: PhaseCounts,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub allocatable: BTreeMap<String, String>,
    #[serde(default)]
    pub capacity: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub status: String,
    #[serde(rename = "podIP", default)]
    pub pod_ip: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub containers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceSummary {
    pub name: String,
    pub pods: PhaseCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSummary {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub available: i32,
    pub ready: i32,
}

/// One aggregated record; fields present depend on `dimension`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRecord {
    pub dimension: String,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub pod: Option<String>,
    #[serde(default)]
    pub cpu_usage_percent: Option<f64>,
    #[serde(default)]
    pub memory_usage_percent: Option<f64>,
    #[serde(default)]
    pub disk_usage_percent: Option<f64>,
    #[serde(default)]
    pub load1: Option<f64>,
    #[serde(default)]
    pub cpu_usage_cores: Option<f64>,
    #[serde(default)]
    pub memory_working_set_bytes: Option<f64>,
    #[serde(default)]
    pub restarts: Option<u64>,
    #[serde(default)]
    pub node_count: Option<u64>,
    #[serde(default)]
    pub pod_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicMetrics {
    pub up_status: bool,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricList {
    pub metrics: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_post_unwraps_envelope_and_sends_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/kubernetes/service/scale")
            .match_header("authorization", "Bearer s3cret")
            .match_body(Matcher::Json(serde_json::json!({
                "namespace": "default",
                "name": "web",
                "replicas": 3
            })))
            .with_status(200)
            .with_body(
                r#"{"status":"success","message":"Scaled default/web",
                    "data":{"name":"web","namespace":"default","operation":"scale",
                            "attempts":1,"detail":{"kind":"scaled","from":1,"to":3}}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), Some("s3cret".to_string())).unwrap();
        let change: AppliedChange = client
            .post(
                "api/v1/kubernetes/service/scale",
                &ScaleRequest {
                    target: TargetRequest {
                        namespace: "default".into(),
                        name: "web".into(),
                    },
                    replicas: 3,
                },
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(change.attempts, 1);
        assert!(matches!(change.detail, ChangeDetail::Scaled { from: 1, to: 3 }));
    }

    #[tokio::test]
    async fn test_error_envelope_surfaces_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/restart")
            .with_status(404)
            .with_body(r#"{"status":"error","message":"Request failed","error":"not found: deployment default/ghost"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), None).unwrap();
        let err = client
            .post::<AppliedChange, _>(
                "api/v1/restart",
                &TargetRequest {
                    namespace: "default".into(),
                    name: "ghost".into(),
                },
            )
            .await
            .unwrap_err();

        match err.downcast_ref::<ClientError>() {
            Some(ClientError::Api { status, message }) => {
                assert_eq!(*status, StatusCode::NOT_FOUND);
                assert!(message.contains("default/ghost"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_metrics_records_decode_per_dimension() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/prometheus/metrics/pods")
            .with_status(200)
            .with_body(
                r#"{"status":"success","message":"2 pod records","data":[
                    {"dimension":"pod","namespace":"default","pod":"a","cpuUsageCores":0.5,"memoryWorkingSetBytes":0.0,"restarts":0},
                    {"dimension":"pod","namespace":"default","pod":"b","cpuUsageCores":0.0,"memoryWorkingSetBytes":1024.0,"restarts":2}
                ]}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), None).unwrap();
        let records: Vec<MetricsRecord> = client.get("api/v1/prometheus/metrics/pods").await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].pod.as_deref(), Some("b"));
        assert_eq!(records[1].restarts, Some(2));
        assert!(records[0].instance.is_none());
    }

    #[tokio::test]
    async fn test_missing_data_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/kubernetes/metrics/cluster")
            .with_status(200)
            .with_body(r#"{"status":"success","message":"nothing"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), None).unwrap();
        let err = client
            .get::<ClusterInventory>("api/v1/kubernetes/metrics/cluster")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClientError>(),
            Some(ClientError::MissingData(_))
        ));
    }

    #[test]
    fn test_base_url_keeps_prefix() {
        let client = ApiClient::new("http://gw.local/ops", None).unwrap();
        assert_eq!(
            client.base_url.join("api/v1/ping").unwrap().as_str(),
            "http://gw.local/ops/api/v1/ping"
        );
        assert!(ApiClient::new("not a url", None).is_err());
    }

    #[tokio::test]
    async fn test_get_basic_metrics() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/prometheus/metrics/basic")
            .with_status(200)
            .with_body(
                r#"{"status":"success","message":"basic metrics",
                    "data":{"upStatus":true,"cpuUsage":0.02,"memoryUsage":1048576.0,
                            "timestamp":"2024-05-01T10:00:00Z"}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), None).unwrap();
        let basic: BasicMetrics = client.get("api/v1/prometheus/metrics/basic").await.unwrap();

        mock.assert_async().await;
        assert!(basic.up_status);
        assert_eq!(basic.memory_usage, 1048576.0);
        assert!(basic.timestamp.is_some());
    }
}
