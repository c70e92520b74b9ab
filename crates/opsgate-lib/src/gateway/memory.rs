//! In-memory gateways for tests
//!
//! `InMemoryOrchestrator` enforces the concurrency token the same way the API
//! server does and can be told to lose the race a number of times.
//! `StaticMetrics` answers queries from a table keyed by expression.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Container;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{MetricsGateway, OrchestratorGateway};
use crate::error::{Error, Result};
use crate::models::{
    ConcurrencyToken, MetricQuery, MetricSample, NodeSummary, PodSummary, RevisionRecord,
    Workload, WorkloadRef, WorkloadStatus, WorkloadSummary,
};

/// Build a workload with one container per image
pub fn workload(namespace: &str, name: &str, replicas: i32, images: &[&str]) -> Workload {
    let reference = WorkloadRef::new(namespace, name);
    Workload {
        replicas,
        containers: containers(images),
        annotations: BTreeMap::new(),
        template_annotations: BTreeMap::new(),
        status: WorkloadStatus {
            name: reference.name.clone(),
            namespace: reference.namespace.clone(),
            desired: replicas,
            replicas,
            available: replicas,
            ready: replicas,
            updated: replicas,
            ..Default::default()
        },
        token: ConcurrencyToken("1".into()),
        reference,
    }
}

/// Build a revision record with one container per image
pub fn revision(id: &str, revision: Option<&str>, images: &[&str]) -> RevisionRecord {
    RevisionRecord {
        id: id.to_string(),
        revision: revision.map(str::to_string),
        containers: containers(images),
        created_at: None,
    }
}

fn containers(images: &[&str]) -> Vec<Container> {
    images
        .iter()
        .enumerate()
        .map(|(i, image)| Container {
            name: format!("c{}", i),
            image: Some(image.to_string()),
            ..Default::default()
        })
        .collect()
}

/// Build a sample from label pairs
pub fn sample(labels: &[(&str, &str)], value: f64) -> MetricSample {
    MetricSample {
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        value,
        timestamp: None,
    }
}

#[derive(Default)]
struct ClusterState {
    workloads: HashMap<WorkloadRef, Workload>,
    history: HashMap<WorkloadRef, Vec<RevisionRecord>>,
    nodes: Vec<NodeSummary>,
    pods: Vec<PodSummary>,
}

/// Orchestrator fake with token checking and injectable races
#[derive(Default)]
pub struct InMemoryOrchestrator {
    state: Mutex<ClusterState>,
    /// Updates that lose the race before one is allowed through
    conflicts: AtomicU32,
    always_conflict: bool,
    unavailable: Option<String>,
    update_delay: Option<Duration>,
    read_delay: Option<Duration>,
    gets: AtomicU32,
    updates: AtomicU32,
    history_reads: AtomicU32,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workload(self, workload: Workload) -> Self {
        self.state
            .lock()
            .unwrap()
            .workloads
            .insert(workload.reference.clone(), workload);
        self
    }

    pub fn with_history(self, target: WorkloadRef, history: Vec<RevisionRecord>) -> Self {
        self.state.lock().unwrap().history.insert(target, history);
        self
    }

    pub fn with_nodes(self, nodes: Vec<NodeSummary>) -> Self {
        self.state.lock().unwrap().nodes = nodes;
        self
    }

    pub fn with_pods(self, pods: Vec<PodSummary>) -> Self {
        self.state.lock().unwrap().pods = pods;
        self
    }

    /// The next `n` updates fail with a stale token
    pub fn conflicting(self, n: u32) -> Self {
        self.conflicts.store(n, Ordering::SeqCst);
        self
    }

    /// Every update fails with a stale token
    pub fn always_conflicting(mut self) -> Self {
        self.always_conflict = true;
        self
    }

    /// Every call fails as if the API server were down
    pub fn unreachable(mut self, message: &str) -> Self {
        self.unavailable = Some(message.to_string());
        self
    }

    pub fn with_update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = Some(delay);
        self
    }

    /// Every read waits this long before answering
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn workload(&self, target: &WorkloadRef) -> Option<Workload> {
        self.state.lock().unwrap().workloads.get(target).cloned()
    }

    pub fn get_calls(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> u32 {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn history_reads(&self) -> u32 {
        self.history_reads.load(Ordering::SeqCst)
    }

    async fn slow_read(&self) {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_reachable(&self) -> Result<()> {
        match &self.unavailable {
            Some(msg) => Err(Error::Unavailable(msg.clone())),
            None => Ok(()),
        }
    }

    /// Simulate another writer: bump the stored token
    fn race(&self, target: &WorkloadRef) {
        let mut state = self.state.lock().unwrap();
        if let Some(current) = state.workloads.get_mut(target) {
            current.token = next_token(&current.token);
        }
    }
}

fn next_token(token: &ConcurrencyToken) -> ConcurrencyToken {
    let n: u64 = token.0.parse().unwrap_or(0);
    ConcurrencyToken((n + 1).to_string())
}

#[async_trait]
impl OrchestratorGateway for InMemoryOrchestrator {
    async fn get_workload(&self, target: &WorkloadRef) -> Result<Workload> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.slow_read().await;
        self.check_reachable()?;
        self.workload(target)
            .ok_or_else(|| Error::NotFound(format!("deployment {}", target)))
    }

    async fn update_workload(&self, desired: &Workload) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if let Some(delay) = self.update_delay {
            tokio::time::sleep(delay).await;
        }

        let target = &desired.reference;
        let pending = self.conflicts.load(Ordering::SeqCst);
        if self.always_conflict || pending > 0 {
            if pending > 0 {
                self.conflicts.store(pending - 1, Ordering::SeqCst);
            }
            self.race(target);
            return Err(Error::Conflict(format!("deployment {} was modified", target)));
        }

        let mut state = self.state.lock().unwrap();
        let current = state
            .workloads
            .get_mut(target)
            .ok_or_else(|| Error::NotFound(format!("deployment {}", target)))?;
        if current.token != desired.token {
            return Err(Error::Conflict(format!(
                "deployment {}: token {} is stale, current is {}",
                target, desired.token, current.token
            )));
        }

        let mut stored = desired.clone();
        stored.token = next_token(&current.token);
        stored.status.desired = stored.replicas;
        *current = stored;
        Ok(())
    }

    async fn list_revision_history(&self, target: &WorkloadRef) -> Result<Vec<RevisionRecord>> {
        self.history_reads.fetch_add(1, Ordering::SeqCst);
        self.slow_read().await;
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        if !state.workloads.contains_key(target) {
            return Err(Error::NotFound(format!("deployment {}", target)));
        }
        Ok(state.history.get(target).cloned().unwrap_or_default())
    }

    async fn list_nodes(&self, name: Option<&str>) -> Result<Vec<NodeSummary>> {
        self.slow_read().await;
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        match name {
            None => Ok(state.nodes.clone()),
            Some(name) => state
                .nodes
                .iter()
                .find(|n| n.name == name)
                .map(|n| vec![n.clone()])
                .ok_or_else(|| Error::NotFound(format!("node {}", name))),
        }
    }

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<PodSummary>> {
        self.slow_read().await;
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|p| namespace.map_or(true, |ns| p.namespace == ns))
            .cloned()
            .collect())
    }

    async fn list_workloads(&self, namespace: Option<&str>) -> Result<Vec<WorkloadSummary>> {
        self.slow_read().await;
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        let mut out: Vec<WorkloadSummary> = state
            .workloads
            .values()
            .filter(|w| namespace.map_or(true, |ns| w.reference.namespace == ns))
            .map(|w| WorkloadSummary {
                name: w.reference.name.clone(),
                namespace: w.reference.namespace.clone(),
                replicas: w.replicas,
                available: w.status.available,
                ready: w.status.ready,
            })
            .collect();
        out.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(out)
    }
}

/// Metrics fake answering from a fixed table
#[derive(Default)]
pub struct StaticMetrics {
    answers: HashMap<String, Result<Vec<MetricSample>>>,
    seen: Mutex<Vec<MetricQuery>>,
}

impl StaticMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, expression: impl Into<String>, samples: Vec<MetricSample>) -> Self {
        self.answers.insert(expression.into(), Ok(samples));
        self
    }

    pub fn fail(mut self, expression: impl Into<String>, err: Error) -> Self {
        self.answers.insert(expression.into(), Err(err));
        self
    }

    /// Queries received so far, in arrival order
    pub fn seen(&self) -> Vec<MetricQuery> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsGateway for StaticMetrics {
    async fn query(&self, query: &MetricQuery) -> Result<Vec<MetricSample>> {
        self.seen.lock().unwrap().push(query.clone());
        match self.answers.get(&query.expression) {
            Some(answer) => answer.clone(),
            None => Ok(Vec::new()),
        }
    }
}
