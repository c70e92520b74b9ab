//! Orchestrator-side inventory: cluster counts, nodes, pods, namespaces and
//! workloads as the orchestrator itself reports them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{within, Result, DEFAULT_DEADLINE};
use crate::gateway::OrchestratorGateway;
use crate::models::{NodeStatus, NodeSummary, PodSummary, WorkloadSummary};
use crate::validation::{normalize_namespace_filter, validate_object_name};

/// Pod counts per phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounts {
    pub total: usize,
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
    pub succeeded: usize,
}

impl PhaseCounts {
    fn add(&mut self, phase: &str) {
        self.total += 1;
        match phase {
            "Running" => self.running += 1,
            "Pending" => self.pending += 1,
            "Failed" => self.failed += 1,
            "Succeeded" => self.succeeded += 1,
            _ => {}
        }
    }

    fn from_pods<'a>(pods: impl IntoIterator<Item = &'a PodSummary>) -> Self {
        let mut counts = Self::default();
        for pod in pods {
            counts.add(&pod.status);
        }
        counts
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub total: usize,
    pub ready: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInventory {
    pub nodes: NodeCounts,
    pub pods: PhaseCounts,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSummary {
    pub name: String,
    pub pods: PhaseCounts,
}

/// Builds inventory views from orchestrator listings
#[derive(Clone)]
pub struct InventoryReporter {
    orchestrator: Arc<dyn OrchestratorGateway>,
    deadline: Duration,
}

impl InventoryReporter {
    pub fn new(orchestrator: Arc<dyn OrchestratorGateway>) -> Self {
        Self {
            orchestrator,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn cluster(&self) -> Result<ClusterInventory> {
        let (nodes, pods) = within(self.deadline, "cluster inventory", async {
            futures::try_join!(
                self.orchestrator.list_nodes(None),
                self.orchestrator.list_pods(None)
            )
        })
        .await?;

        Ok(ClusterInventory {
            nodes: NodeCounts {
                total: nodes.len(),
                ready: nodes
                    .iter()
                    .filter(|n| n.status == NodeStatus::Ready)
                    .count(),
            },
            pods: PhaseCounts::from_pods(&pods),
            timestamp: Utc::now(),
        })
    }

    pub async fn nodes(&self, name: Option<&str>) -> Result<Vec<NodeSummary>> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        if let Some(name) = name {
            validate_object_name("node", name)?;
        }
        within(self.deadline, "node listing", self.orchestrator.list_nodes(name)).await
    }

    pub async fn pods(&self, namespace: Option<&str>) -> Result<Vec<PodSummary>> {
        let namespace = normalize_namespace_filter(namespace)?;
        within(
            self.deadline,
            "pod listing",
            self.orchestrator.list_pods(namespace.as_deref()),
        )
        .await
    }

    /// Namespaces that currently hold pods, with per-phase counts, by name
    pub async fn namespaces(&self) -> Result<Vec<NamespaceSummary>> {
        let pods = within(
            self.deadline,
            "namespace listing",
            self.orchestrator.list_pods(None),
        )
        .await?;
        let mut by_namespace: BTreeMap<String, PhaseCounts> = BTreeMap::new();
        for pod in &pods {
            by_namespace
                .entry(pod.namespace.clone())
                .or_default()
                .add(&pod.status);
        }
        Ok(by_namespace
            .into_iter()
            .map(|(name, pods)| NamespaceSummary { name, pods })
            .collect())
    }

    pub async fn workloads(&self, namespace: Option<&str>) -> Result<Vec<WorkloadSummary>> {
        let namespace = normalize_namespace_filter(namespace)?;
        within(
            self.deadline,
            "deployment listing",
            self.orchestrator.list_workloads(namespace.as_deref()),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::gateway::memory::{workload, InMemoryOrchestrator};

    fn node(name: &str, status: NodeStatus) -> NodeSummary {
        NodeSummary {
            name: name.into(),
            status,
            allocatable: BTreeMap::new(),
            capacity: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    fn pod(namespace: &str, name: &str, phase: &str) -> PodSummary {
        PodSummary {
            name: name.into(),
            namespace: namespace.into(),
            status: phase.into(),
            host_ip: None,
            pod_ip: None,
            start_time: None,
            containers: 1,
        }
    }

    fn reporter() -> InventoryReporter {
        let orchestrator = InMemoryOrchestrator::new()
            .with_nodes(vec![
                node("node-a", NodeStatus::Ready),
                node("node-b", NodeStatus::NotReady),
                node("node-c", NodeStatus::Unknown),
            ])
            .with_pods(vec![
                pod("prod", "web-1", "Running"),
                pod("prod", "web-2", "Pending"),
                pod("default", "job-1", "Succeeded"),
                pod("default", "job-2", "Failed"),
                pod("default", "api-1", "Running"),
            ])
            .with_workload(workload("prod", "web", 2, &["app:v1"]))
            .with_workload(workload("default", "api", 1, &["api:v1"]));
        InventoryReporter::new(Arc::new(orchestrator))
    }

    #[tokio::test]
    async fn test_cluster_counts() {
        let inventory = reporter().cluster().await.unwrap();
        assert_eq!(inventory.nodes, NodeCounts { total: 3, ready: 1 });
        assert_eq!(
            inventory.pods,
            PhaseCounts {
                total: 5,
                running: 2,
                pending: 1,
                failed: 1,
                succeeded: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_namespaces_are_sorted_with_counts() {
        let namespaces = reporter().namespaces().await.unwrap();
        let names: Vec<&str> = namespaces.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["default", "prod"]);
        assert_eq!(namespaces[1].pods.running, 1);
        assert_eq!(namespaces[1].pods.pending, 1);
    }

    #[tokio::test]
    async fn test_filters() {
        let reporter = reporter();
        assert_eq!(reporter.pods(Some("prod")).await.unwrap().len(), 2);
        assert_eq!(reporter.pods(None).await.unwrap().len(), 5);
        assert_eq!(reporter.workloads(Some("default")).await.unwrap()[0].name, "api");
        assert_eq!(reporter.nodes(Some("node-b")).await.unwrap().len(), 1);
        assert!(matches!(
            reporter.nodes(Some("missing")).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            reporter.pods(Some("NOPE")).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_listing_is_unavailable() {
        let orchestrator = InMemoryOrchestrator::new()
            .with_nodes(vec![node("node-a", NodeStatus::Ready)])
            .with_read_delay(Duration::from_millis(200));
        let reporter =
            InventoryReporter::new(Arc::new(orchestrator)).with_deadline(Duration::from_millis(20));

        assert!(matches!(reporter.cluster().await, Err(Error::Unavailable(_))));
        assert!(matches!(reporter.nodes(None).await, Err(Error::Unavailable(_))));
        assert!(matches!(
            reporter.workloads(Some("default")).await,
            Err(Error::Unavailable(_))
        ));
    }
}
