//! Core data models for the operations gateway

use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::Container;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::validation;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Identifies a mutable workload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    #[serde(default = "default_namespace", deserialize_with = "namespace_or_default")]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn namespace_or_default<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|ns| !ns.trim().is_empty())
        .unwrap_or_else(default_namespace))
}

impl WorkloadRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: if namespace.trim().is_empty() {
                default_namespace()
            } else {
                namespace
            },
            name: name.into(),
        }
    }

    /// Name must be present and both parts must be valid object names
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("service name is required".into()));
        }
        validation::validate_object_name("name", &self.name)?;
        validation::validate_label("namespace", &self.namespace)
    }
}

impl Default for WorkloadRef {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE, "")
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Request to change the replica count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleSpec {
    #[serde(flatten)]
    pub target: WorkloadRef,
    pub replicas: i32,
}

impl ScaleSpec {
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if self.replicas < 0 {
            return Err(Error::Validation(
                "replicas must be a non-negative integer".into(),
            ));
        }
        Ok(())
    }
}

/// Request to change the container image or only its tag
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSpec {
    #[serde(flatten)]
    pub target: WorkloadRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl UpdateSpec {
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if non_empty(&self.image).is_none() && non_empty(&self.version).is_none() {
            return Err(Error::Validation(
                "either image or version must be specified".into(),
            ));
        }
        Ok(())
    }
}

/// Request to return a workload to an earlier revision
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackSpec {
    #[serde(flatten)]
    pub target: WorkloadRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl RollbackSpec {
    pub fn validate(&self) -> Result<()> {
        self.target.validate()
    }
}

/// Treat `Some("")` the same as `None`
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Opaque version stamp captured on read and required on write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyToken(pub String);

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current state of a workload as read from the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub reference: WorkloadRef,
    /// Desired replica count from the spec
    pub replicas: i32,
    pub containers: Vec<Container>,
    /// Annotations on the workload object itself
    pub annotations: BTreeMap<String, String>,
    /// Annotations on the pod template
    pub template_annotations: BTreeMap<String, String>,
    pub status: WorkloadStatus,
    pub token: ConcurrencyToken,
}

impl Workload {
    pub fn images(&self) -> Vec<String> {
        container_images(&self.containers)
    }
}

pub(crate) fn container_images(containers: &[Container]) -> Vec<String> {
    containers
        .iter()
        .filter_map(|c| c.image.clone())
        .collect()
}

/// A historical snapshot of a workload's pod template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRecord {
    /// Object name of the snapshot (ReplicaSet name)
    pub id: String,
    /// Revision annotation, if the orchestrator stamped one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub containers: Vec<Container>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl RevisionRecord {
    pub fn images(&self) -> Vec<String> {
        container_images(&self.containers)
    }

    pub fn revision_number(&self) -> Option<i64> {
        self.revision.as_deref().and_then(|r| r.trim().parse().ok())
    }

    /// Human-readable revision label, falling back to the object name
    pub fn label(&self) -> &str {
        self.revision.as_deref().unwrap_or(&self.id)
    }
}

/// One workload condition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Flat, serializable status snapshot of a workload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
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
    pub conditions: Vec<WorkloadCondition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

/// Kind of mutation applied to a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Scale,
    Restart,
    Update,
    Rollback,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Scale => "scale",
            Operation::Restart => "restart",
            Operation::Update => "update",
            Operation::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a landed mutation changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeDetail {
    Scaled { from: i32, to: i32 },
    Restarted { restarted_at: String },
    Updated { images: Vec<String> },
    RolledBack { revision: String, images: Vec<String> },
}

/// Result of a mutation whose conditional update landed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub name: String,
    pub namespace: String,
    pub operation: Operation,
    /// Number of submissions, including the one that landed
    pub attempts: u32,
    pub detail: ChangeDetail,
}

/// A single time-series query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

impl MetricQuery {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            time: None,
        }
    }

    pub fn at(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.time = time;
        self
    }
}

/// One row of one query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MetricSample {
    /// Decode a raw backend value; anything that is not a finite decimal becomes NaN
    pub fn from_raw(labels: BTreeMap<String, String>, unix_secs: f64, raw_value: &str) -> Self {
        let value = raw_value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .unwrap_or(f64::NAN);
        let timestamp = if unix_secs.is_finite() && unix_secs > 0.0 {
            let secs = unix_secs.trunc() as i64;
            let nanos = (unix_secs.fract() * 1e9) as u32;
            Utc.timestamp_opt(secs, nanos).single()
        } else {
            None
        };
        Self {
            labels,
            value,
            timestamp,
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value with the numeric-parse fallback applied
    pub fn finite_value(&self) -> f64 {
        if self.value.is_finite() {
            self.value
        } else {
            0.0
        }
    }
}

/// Readiness of a cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Ready,
    NotReady,
    Unknown,
}

impl NodeStatus {
    /// Derive from the status of the node's `Ready` condition, if any
    pub fn from_ready_condition(status: Option<&str>) -> Self {
        match status {
            Some("True") => NodeStatus::Ready,
            Some(_) => NodeStatus::NotReady,
            None => NodeStatus::Unknown,
        }
    }
}

/// Node as listed by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    pub status: NodeStatus,
    pub allocatable: BTreeMap<String, String>,
    pub capacity: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// Pod as listed by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub status: String,
    #[serde(rename = "hostIP", skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    #[serde(rename = "podIP", skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    pub containers: usize,
}

/// Workload as listed by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSummary {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub available: i32,
    pub ready: i32,
}
