//! Cross-query metrics aggregation
//!
//! A dimension (cluster, node, pod, namespace) is described by a handful of
//! independent queries. They run concurrently; their samples are joined on the
//! dimension's identity labels into one record per entity.

mod queries;

#[cfg(test)]
mod tests;

pub use queries::Field;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::gateway::MetricsGateway;
use crate::models::{MetricQuery, MetricSample};
use crate::observability::{OpsMetrics, StructuredLogger};
use crate::validation::{normalize_namespace_filter, validate_metric_name};

/// Entity kind metrics are aggregated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Cluster,
    Node,
    Pod,
    Namespace,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Cluster => "cluster",
            Dimension::Node => "node",
            Dimension::Pod => "pod",
            Dimension::Namespace => "namespace",
        }
    }

    /// Labels that identify one entity; empty for the cluster as a whole
    pub fn identity_labels(&self) -> &'static [&'static str] {
        match self {
            Dimension::Cluster => &[],
            Dimension::Node => &["instance"],
            Dimension::Pod => &["namespace", "pod"],
            Dimension::Namespace => &["namespace"],
        }
    }

    fn scoped_by_namespace(&self) -> bool {
        matches!(self, Dimension::Pod | Dimension::Namespace)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cluster" => Ok(Dimension::Cluster),
            "node" | "nodes" => Ok(Dimension::Node),
            "pod" | "pods" => Ok(Dimension::Pod),
            "namespace" | "namespaces" => Ok(Dimension::Namespace),
            other => Err(Error::Validation(format!("unknown dimension '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetrics {
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub node_count: u64,
    pub pod_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    pub instance: String,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub load1: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetrics {
    pub namespace: String,
    pub pod: String,
    pub cpu_usage_cores: f64,
    pub memory_working_set_bytes: f64,
    pub restarts: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceMetrics {
    pub namespace: String,
    pub cpu_usage_cores: f64,
    pub memory_working_set_bytes: f64,
    pub pod_count: u64,
}

/// Scrape-target liveness and process usage, from the first sample of each query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicMetrics {
    pub up_status: bool,
    /// CPU seconds per second over the last minute
    pub cpu_usage: f64,
    /// Resident memory in bytes
    pub memory_usage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One joined record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dimension", rename_all = "lowercase")]
pub enum AggregatedMetrics {
    Cluster(ClusterMetrics),
    Node(NodeMetrics),
    Pod(PodMetrics),
    Namespace(NamespaceMetrics),
}

/// Identity key; label values in `identity_labels` order
type EntityKey = Vec<String>;
type Joined = BTreeMap<EntityKey, BTreeMap<Field, f64>>;

fn count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

/// Join per-query samples on the identity key.
///
/// Samples missing an identity label are skipped. Non-finite values count as 0.
fn join(dimension: Dimension, results: Vec<(Field, Vec<MetricSample>)>) -> Joined {
    let identity = dimension.identity_labels();
    let mut joined = Joined::new();

    for (field, samples) in results {
        for sample in samples {
            let key: Option<EntityKey> = identity
                .iter()
                .map(|label| sample.label(label).map(str::to_string))
                .collect();
            let Some(key) = key else {
                debug!(
                    dimension = %dimension,
                    field = field.as_str(),
                    labels = ?sample.labels,
                    "Skipping sample without identity labels"
                );
                continue;
            };
            joined
                .entry(key)
                .or_default()
                .insert(field, sample.finite_value());
        }
    }

    joined
}

fn records(dimension: Dimension, joined: Joined) -> Vec<AggregatedMetrics> {
    joined
        .into_iter()
        .map(|(key, fields)| {
            let get = |f: Field| fields.get(&f).copied().unwrap_or(0.0);
            let part = |i: usize| key.get(i).cloned().unwrap_or_default();
            match dimension {
                Dimension::Cluster => AggregatedMetrics::Cluster(ClusterMetrics {
                    cpu_usage_percent: get(Field::CpuPercent),
                    memory_usage_percent: get(Field::MemoryPercent),
                    disk_usage_percent: get(Field::DiskPercent),
                    node_count: count(get(Field::NodeCount)),
                    pod_count: count(get(Field::PodCount)),
                }),
                Dimension::Node => AggregatedMetrics::Node(NodeMetrics {
                    instance: part(0),
                    cpu_usage_percent: get(Field::CpuPercent),
                    memory_usage_percent: get(Field::MemoryPercent),
                    disk_usage_percent: get(Field::DiskPercent),
                    load1: get(Field::Load1),
                }),
                Dimension::Pod => AggregatedMetrics::Pod(PodMetrics {
                    namespace: part(0),
                    pod: part(1),
                    cpu_usage_cores: get(Field::CpuCores),
                    memory_working_set_bytes: get(Field::MemoryBytes),
                    restarts: count(get(Field::Restarts)),
                }),
                Dimension::Namespace => AggregatedMetrics::Namespace(NamespaceMetrics {
                    namespace: part(0),
                    cpu_usage_cores: get(Field::CpuCores),
                    memory_working_set_bytes: get(Field::MemoryBytes),
                    pod_count: count(get(Field::PodCount)),
                }),
            }
        })
        .collect()
}

/// Fans queries out to the metrics backend and joins the answers
#[derive(Clone)]
pub struct MetricsAggregator {
    backend: Arc<dyn MetricsGateway>,
    metrics: OpsMetrics,
    logger: StructuredLogger,
}

impl MetricsAggregator {
    pub fn new(backend: Arc<dyn MetricsGateway>) -> Self {
        Self {
            backend,
            metrics: OpsMetrics::new(),
            logger: StructuredLogger::new("opsgate"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// One record per entity, ordered by identity key.
    ///
    /// Any failing query fails the whole aggregation.
    pub async fn aggregate(
        &self,
        dimension: Dimension,
        namespace: Option<&str>,
        at: Option<DateTime<Utc>>,
    ) -> Result<Vec<AggregatedMetrics>> {
        let namespace = normalize_namespace_filter(namespace)?;
        let scope = namespace.as_deref().filter(|_| dimension.scoped_by_namespace());
        let started = Instant::now();

        let plan = queries::plan(dimension, scope);
        let results = try_join_all(plan.into_iter().map(|(field, expression)| async move {
            let samples = self
                .backend
                .query(&MetricQuery::new(expression).at(at))
                .await
                .map_err(|e| e.context(format!("{} {}", dimension, field.as_str())))?;
            Ok::<_, Error>((field, samples))
        }))
        .await?;

        let records = records(dimension, join(dimension, results));
        let elapsed = started.elapsed();
        self.metrics
            .observe_aggregation_latency(dimension.as_str(), elapsed.as_secs_f64());
        self.logger
            .log_aggregation(dimension.as_str(), records.len(), elapsed);
        Ok(records)
    }

    /// Liveness plus process CPU and memory.
    ///
    /// Missing series read as down and zero; any failing query fails the call.
    pub async fn basic(&self) -> Result<BasicMetrics> {
        let query = |expression: &'static str| async move {
            self.backend
                .query(&MetricQuery::new(expression))
                .await
                .map_err(|e| e.context(format!("basic {}", expression)))
        };
        let (up, cpu, memory) = futures::try_join!(
            query(queries::UP),
            query(queries::PROCESS_CPU),
            query(queries::PROCESS_MEMORY)
        )?;

        let first = |samples: &[MetricSample]| samples.first().map(MetricSample::finite_value);
        Ok(BasicMetrics {
            up_status: first(&up).map_or(false, |v| v > 0.0),
            cpu_usage: first(&cpu).unwrap_or(0.0),
            memory_usage: first(&memory).unwrap_or(0.0),
            timestamp: up.first().and_then(|s| s.timestamp),
        })
    }

    /// Distinct names of every series the backend holds, sorted
    pub async fn metric_names(&self) -> Result<Vec<String>> {
        let samples = self
            .backend
            .query(&MetricQuery::new(queries::ALL_SERIES))
            .await
            .map_err(|e| e.context("metric list"))?;
        let names: BTreeSet<String> = samples
            .into_iter()
            .filter_map(|mut s| s.labels.remove("__name__"))
            .filter(|name| !name.is_empty())
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Single-expression passthrough
    pub async fn query(&self, query: &MetricQuery) -> Result<Vec<MetricSample>> {
        if query.expression.trim().is_empty() {
            return Err(Error::Validation("query expression is required".into()));
        }
        self.backend.query(query).await
    }

    /// Current samples of one metric by name
    pub async fn series(&self, name: &str, at: Option<DateTime<Utc>>) -> Result<Vec<MetricSample>> {
        validate_metric_name(name)?;
        self.backend
            .query(&MetricQuery::new(name).at(at))
            .await
            .map_err(|e| e.context(format!("series {}", name)))
    }
}
