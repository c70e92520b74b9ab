//! Orchestrator gateway backed by the Kubernetes API
//!
//! Workloads are Deployments, revision history is the set of ReplicaSets the
//! Deployment owns. Writes are JSON merge patches that carry
//! `metadata.resourceVersion`, which makes the API server reject stale writes
//! with 409.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use super::{OrchestratorGateway, ORCHESTRATOR};
use crate::error::{Error, Result};
use crate::models::{
    ConcurrencyToken, NodeStatus, NodeSummary, PodSummary, RevisionRecord, Workload,
    WorkloadCondition, WorkloadRef, WorkloadStatus, WorkloadSummary,
};
use crate::observability::OpsMetrics;

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Kubernetes-backed orchestrator gateway
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
    metrics: OpsMetrics,
}

impl KubeOrchestrator {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            metrics: OpsMetrics::new(),
        }
    }

    /// Build from in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Unavailable(format!("kubernetes client: {}", e)))?;
        Ok(Self::new(client))
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn fail(&self, err: kube::Error, what: impl std::fmt::Display) -> Error {
        let err = map_kube_error(err, &what.to_string());
        self.metrics.inc_gateway_error(ORCHESTRATOR, &err);
        err
    }

    async fn get_deployment(&self, target: &WorkloadRef) -> Result<Deployment> {
        self.deployments(&target.namespace)
            .get(&target.name)
            .await
            .map_err(|e| self.fail(e, format!("deployment {}", target)))
    }
}

#[async_trait]
impl OrchestratorGateway for KubeOrchestrator {
    async fn get_workload(&self, target: &WorkloadRef) -> Result<Workload> {
        let deployment = self.get_deployment(target).await?;
        workload_from_deployment(target, deployment)
    }

    async fn update_workload(&self, desired: &Workload) -> Result<()> {
        let target = &desired.reference;
        let patch = merge_patch(desired)?;
        debug!(
            namespace = %target.namespace,
            name = %target.name,
            resource_version = %desired.token,
            "Submitting conditional update"
        );
        self.deployments(&target.namespace)
            .patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| self.fail(e, format!("update deployment {}", target)))?;
        Ok(())
    }

    async fn list_revision_history(&self, target: &WorkloadRef) -> Result<Vec<RevisionRecord>> {
        let deployment = self.get_deployment(target).await?;
        let selector = label_selector(&deployment);

        let mut params = ListParams::default();
        if let Some(selector) = selector.as_deref() {
            params = params.labels(selector);
        }
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), &target.namespace);
        let list = api
            .list(&params)
            .await
            .map_err(|e| self.fail(e, format!("revision history of {}", target)))?;

        Ok(list
            .items
            .into_iter()
            .filter(|rs| owned_by(rs, &target.name))
            .map(revision_from_replica_set)
            .collect())
    }

    async fn list_nodes(&self, name: Option<&str>) -> Result<Vec<NodeSummary>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = match name {
            Some(name) => vec![api
                .get(name)
                .await
                .map_err(|e| self.fail(e, format!("node {}", name)))?],
            None => {
                api.list(&ListParams::default())
                    .await
                    .map_err(|e| self.fail(e, "list nodes"))?
                    .items
            }
        };
        Ok(nodes.into_iter().map(node_summary).collect())
    }

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<PodSummary>> {
        let api: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| self.fail(e, "list pods"))?;
        Ok(list.items.into_iter().map(pod_summary).collect())
    }

    async fn list_workloads(&self, namespace: Option<&str>) -> Result<Vec<WorkloadSummary>> {
        let api: Api<Deployment> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| self.fail(e, "list deployments"))?;
        Ok(list.items.into_iter().map(workload_summary).collect())
    }
}

/// Map a kube client error onto the shared taxonomy by HTTP status
pub(crate) fn map_kube_error(err: kube::Error, what: &str) -> Error {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => Error::NotFound(format!("{}: {}", what, resp.message)),
            409 => Error::Conflict(format!("{}: {}", what, resp.message)),
            400 | 422 => Error::Validation(format!("{}: {}", what, resp.message)),
            429 | 502 | 503 | 504 => Error::Unavailable(format!("{}: {}", what, resp.message)),
            code => Error::Transport(format!("{}: {} ({})", what, resp.message, code)),
        },
        kube::Error::HyperError(e) => Error::Unavailable(format!("{}: {}", what, e)),
        kube::Error::Service(e) => Error::Unavailable(format!("{}: {}", what, e)),
        other => Error::Transport(format!("{}: {}", what, other)),
    }
}

fn time(t: Option<Time>) -> Option<chrono::DateTime<chrono::Utc>> {
    t.map(|t| t.0)
}

pub(crate) fn workload_from_deployment(
    target: &WorkloadRef,
    deployment: Deployment,
) -> Result<Workload> {
    let status = deployment_status(&deployment);
    let meta = deployment.metadata;
    let token = meta.resource_version.ok_or_else(|| {
        Error::Transport(format!("deployment {} has no resourceVersion", target))
    })?;
    let spec = deployment.spec.unwrap_or_default();
    let template_annotations = spec
        .template
        .metadata
        .and_then(|m| m.annotations)
        .unwrap_or_default();
    let containers = spec.template.spec.map(|s| s.containers).unwrap_or_default();

    Ok(Workload {
        reference: target.clone(),
        replicas: spec.replicas.unwrap_or(1),
        containers,
        annotations: meta.annotations.unwrap_or_default(),
        template_annotations,
        status,
        token: ConcurrencyToken(token),
    })
}

pub(crate) fn deployment_status(deployment: &Deployment) -> WorkloadStatus {
    let meta = &deployment.metadata;
    let status = deployment.status.clone().unwrap_or_default();
    let conditions = status
        .conditions
        .unwrap_or_default()
        .into_iter()
        .map(|c| WorkloadCondition {
            type_: c.type_,
            status: c.status,
            reason: c.reason,
            message: c.message,
            last_update_time: time(c.last_update_time),
            last_transition_time: time(c.last_transition_time),
        })
        .collect();

    WorkloadStatus {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        desired: deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1),
        replicas: status.replicas.unwrap_or(0),
        available: status.available_replicas.unwrap_or(0),
        ready: status.ready_replicas.unwrap_or(0),
        updated: status.updated_replicas.unwrap_or(0),
        unavailable: status.unavailable_replicas.unwrap_or(0),
        conditions,
        observed_generation: status.observed_generation,
        creation_timestamp: time(meta.creation_timestamp.clone()),
    }
}

/// Merge patch carrying the fields the engine changes plus the token
pub(crate) fn merge_patch(desired: &Workload) -> Result<serde_json::Value> {
    let containers = serde_json::to_value(&desired.containers)
        .map_err(|e| Error::Transport(format!("encode containers: {}", e)))?;
    Ok(json!({
        "metadata": {
            "resourceVersion": desired.token.0,
            "annotations": desired.annotations,
        },
        "spec": {
            "replicas": desired.replicas,
            "template": {
                "metadata": { "annotations": desired.template_annotations },
                "spec": { "containers": containers },
            },
        },
    }))
}

fn label_selector(deployment: &Deployment) -> Option<String> {
    let labels = deployment
        .spec
        .as_ref()?
        .selector
        .match_labels
        .as_ref()?;
    if labels.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn owned_by(rs: &ReplicaSet, deployment: &str) -> bool {
    rs.metadata
        .owner_references
        .as_ref()
        .map(|refs| {
            refs.iter()
                .any(|o| o.kind == "Deployment" && o.name == deployment)
        })
        .unwrap_or(false)
}

pub(crate) fn revision_from_replica_set(rs: ReplicaSet) -> RevisionRecord {
    let meta = rs.metadata;
    RevisionRecord {
        id: meta.name.unwrap_or_default(),
        revision: meta
            .annotations
            .and_then(|mut a| a.remove(REVISION_ANNOTATION)),
        containers: rs
            .spec
            .and_then(|s| s.template)
            .and_then(|t| t.spec)
            .map(|s| s.containers)
            .unwrap_or_default(),
        created_at: time(meta.creation_timestamp),
    }
}

fn quantities(
    map: Option<BTreeMap<String, k8s_openapi::apimachinery::pkg::api::resource::Quantity>>,
) -> BTreeMap<String, String> {
    map.unwrap_or_default()
        .into_iter()
        .map(|(k, q)| (k, q.0))
        .collect()
}

pub(crate) fn node_summary(node: Node) -> NodeSummary {
    let status = node.status.unwrap_or_default();
    let ready = status
        .conditions
        .as_ref()
        .and_then(|cs| cs.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status.as_str());
    NodeSummary {
        name: node.metadata.name.unwrap_or_default(),
        status: NodeStatus::from_ready_condition(ready),
        allocatable: quantities(status.allocatable),
        capacity: quantities(status.capacity),
        labels: node.metadata.labels.unwrap_or_default(),
    }
}

pub(crate) fn pod_summary(pod: Pod) -> PodSummary {
    let status = pod.status.unwrap_or_default();
    PodSummary {
        name: pod.metadata.name.unwrap_or_default(),
        namespace: pod.metadata.namespace.unwrap_or_default(),
        status: status.phase.unwrap_or_else(|| "Unknown".to_string()),
        host_ip: status.host_ip,
        pod_ip: status.pod_ip,
        start_time: time(status.start_time),
        containers: pod.spec.map(|s| s.containers.len()).unwrap_or(0),
    }
}

pub(crate) fn workload_summary(deployment: Deployment) -> WorkloadSummary {
    let status = deployment_status(&deployment);
    WorkloadSummary {
        name: status.name,
        namespace: status.namespace,
        replicas: status.desired,
        available: status.available,
        ready: status.ready,
    }
}
