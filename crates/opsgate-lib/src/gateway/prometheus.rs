//! Metrics gateway backed by the Prometheus HTTP API

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{MetricsGateway, METRICS_BACKEND};
use crate::error::{Error, Result};
use crate::models::{MetricQuery, MetricSample};
use crate::observability::OpsMetrics;

/// Configuration for the Prometheus gateway
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Base URL, e.g. "http://localhost:9090"
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Instant-query client for Prometheus
#[derive(Clone)]
pub struct PrometheusGateway {
    client: Client,
    query_url: String,
    metrics: OpsMetrics,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<VectorSample>),
    Matrix(Vec<MatrixSeries>),
    Scalar((f64, String)),
    #[serde(rename = "string")]
    Text((f64, String)),
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl PrometheusGateway {
    pub fn new(config: PrometheusConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            Error::Validation(format!("invalid metrics backend URL '{}': {}", config.base_url, e))
        })?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            query_url: format!("{}/api/v1/query", base.as_str().trim_end_matches('/')),
            metrics: OpsMetrics::new(),
        })
    }

    pub fn query_url(&self) -> &str {
        &self.query_url
    }

    async fn execute(&self, query: &MetricQuery) -> Result<Vec<MetricSample>> {
        let mut params = vec![("query", query.expression.clone())];
        if let Some(at) = query.time {
            params.push((
                "time",
                format!("{:.3}", at.timestamp_millis() as f64 / 1000.0),
            ));
        }

        debug!(expression = %query.expression, "Querying metrics backend");
        let response = self
            .client
            .get(&self.query_url)
            .query(&params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            return Err(map_status(status, &body));
        }

        let parsed: QueryResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Transport(format!("undecodable query response: {}", e)))?;
        if parsed.status != "success" {
            return Err(Error::Transport(format!(
                "query failed ({}): {}",
                parsed.error_type.unwrap_or_default(),
                parsed.error.unwrap_or_default()
            )));
        }

        Ok(parsed.data.map(samples_from).unwrap_or_default())
    }
}

#[async_trait]
impl MetricsGateway for PrometheusGateway {
    async fn query(&self, query: &MetricQuery) -> Result<Vec<MetricSample>> {
        self.execute(query).await.map_err(|err| {
            self.metrics.inc_gateway_error(METRICS_BACKEND, &err);
            err
        })
    }
}

fn samples_from(data: QueryData) -> Vec<MetricSample> {
    match data {
        QueryData::Vector(rows) => rows
            .into_iter()
            .map(|row| MetricSample::from_raw(row.metric, row.value.0, &row.value.1))
            .collect(),
        // Range selectors in an instant query: keep the newest point per series
        QueryData::Matrix(series) => series
            .into_iter()
            .filter_map(|s| {
                let (ts, raw) = s.values.last()?.clone();
                Some(MetricSample::from_raw(s.metric, ts, &raw))
            })
            .collect(),
        QueryData::Scalar((ts, raw)) | QueryData::Text((ts, raw)) => {
            vec![MetricSample::from_raw(BTreeMap::new(), ts, &raw)]
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::Unavailable(format!("metrics backend: {}", err))
    } else {
        Error::Transport(format!("metrics backend: {}", err))
    }
}

fn map_status(status: StatusCode, body: &str) -> Error {
    let detail = serde_json::from_str::<QueryResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .unwrap_or_else(|| body.trim().to_string());
    match status {
        StatusCode::SERVICE_UNAVAILABLE => {
            Error::Unavailable(format!("metrics backend unavailable: {}", detail))
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            Error::Validation(format!("query rejected: {}", detail))
        }
        other => Error::Transport(format!("metrics backend returned {}: {}", other, detail)),
    }
}
