//! Boundaries to the two downstream systems
//!
//! The orchestrator holds workloads and their revision history; the metrics
//! backend answers time-series queries. Both are injected as trait objects so
//! the core never names a concrete client.

mod kubernetes;
mod prometheus;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use self::kubernetes::KubeOrchestrator;
pub use self::prometheus::{PrometheusConfig, PrometheusGateway};

use crate::error::Result;
use crate::models::{
    MetricQuery, MetricSample, NodeSummary, PodSummary, RevisionRecord, Workload, WorkloadRef,
    WorkloadSummary,
};

use async_trait::async_trait;

/// Gateway label values used in metrics and health tracking
pub const ORCHESTRATOR: &str = "orchestrator";
pub const METRICS_BACKEND: &str = "metrics_backend";

/// Read and conditionally write workloads on the cluster
#[async_trait]
pub trait OrchestratorGateway: Send + Sync {
    /// Current workload state, including the concurrency token
    async fn get_workload(&self, target: &WorkloadRef) -> Result<Workload>;

    /// Submit `desired` guarded by `desired.token`.
    ///
    /// Returns `Error::Conflict` when the token is stale.
    async fn update_workload(&self, desired: &Workload) -> Result<()>;

    /// Snapshots of the workload's pod template, in the orchestrator's order
    async fn list_revision_history(&self, target: &WorkloadRef) -> Result<Vec<RevisionRecord>>;

    async fn list_nodes(&self, name: Option<&str>) -> Result<Vec<NodeSummary>>;

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<PodSummary>>;

    async fn list_workloads(&self, namespace: Option<&str>) -> Result<Vec<WorkloadSummary>>;
}

/// Run instant queries against the metrics backend
#[async_trait]
pub trait MetricsGateway: Send + Sync {
    async fn query(&self, query: &MetricQuery) -> Result<Vec<MetricSample>>;
}
