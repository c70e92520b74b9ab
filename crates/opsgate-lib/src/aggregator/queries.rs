//! Fixed PromQL set per dimension
//!
//! Every expression is already grouped by the dimension's identity labels so
//! the join only has to match keys.

use super::Dimension;

/// Which output field a query fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    CpuPercent,
    MemoryPercent,
    DiskPercent,
    Load1,
    CpuCores,
    MemoryBytes,
    Restarts,
    NodeCount,
    PodCount,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::CpuPercent => "cpu_percent",
            Field::MemoryPercent => "memory_percent",
            Field::DiskPercent => "disk_percent",
            Field::Load1 => "load1",
            Field::CpuCores => "cpu_cores",
            Field::MemoryBytes => "memory_bytes",
            Field::Restarts => "restarts",
            Field::NodeCount => "node_count",
            Field::PodCount => "pod_count",
        }
    }
}

pub const UP: &str = "up";
pub const PROCESS_CPU: &str = "rate(process_cpu_seconds_total[1m])";
pub const PROCESS_MEMORY: &str = "process_resident_memory_bytes";
/// Matches every series the backend currently holds
pub const ALL_SERIES: &str = r#"{__name__=~".+"}"#;

const ROOT_FS: &str = r#"mountpoint="/",fstype!="rootfs""#;

/// Build a label matcher list, appending the namespace filter if any
fn selector(base: &[&str], namespace: Option<&str>) -> String {
    let mut matchers: Vec<String> = base.iter().map(|m| m.to_string()).collect();
    if let Some(ns) = namespace {
        matchers.push(format!(r#"namespace="{}""#, ns));
    }
    format!("{{{}}}", matchers.join(","))
}

/// Queries for a dimension. `namespace` must already be a validated label.
pub fn plan(dimension: Dimension, namespace: Option<&str>) -> Vec<(Field, String)> {
    match dimension {
        Dimension::Cluster => vec![
            (
                Field::CpuPercent,
                r#"100 * (1 - avg(rate(node_cpu_seconds_total{mode="idle"}[5m])))"#.to_string(),
            ),
            (
                Field::MemoryPercent,
                "100 * (1 - sum(node_memory_MemAvailable_bytes) / sum(node_memory_MemTotal_bytes))"
                    .to_string(),
            ),
            (
                Field::DiskPercent,
                format!(
                    "100 * (1 - sum(node_filesystem_avail_bytes{{{fs}}}) / sum(node_filesystem_size_bytes{{{fs}}}))",
                    fs = ROOT_FS
                ),
            ),
            (Field::NodeCount, "count(kube_node_info)".to_string()),
            (Field::PodCount, "count(kube_pod_info)".to_string()),
        ],
        Dimension::Node => vec![
            (
                Field::CpuPercent,
                r#"100 * (1 - avg by (instance) (rate(node_cpu_seconds_total{mode="idle"}[5m])))"#
                    .to_string(),
            ),
            (
                Field::MemoryPercent,
                "100 * (1 - avg by (instance) (node_memory_MemAvailable_bytes / node_memory_MemTotal_bytes))"
                    .to_string(),
            ),
            (
                Field::DiskPercent,
                format!(
                    "100 * (1 - avg by (instance) (node_filesystem_avail_bytes{{{fs}}} / node_filesystem_size_bytes{{{fs}}}))",
                    fs = ROOT_FS
                ),
            ),
            (Field::Load1, "avg by (instance) (node_load1)".to_string()),
        ],
        Dimension::Pod => vec![
            (
                Field::CpuCores,
                format!(
                    "sum by (namespace, pod) (rate(container_cpu_usage_seconds_total{}[5m]))",
                    selector(&[r#"container!="""#, r#"pod!="""#], namespace)
                ),
            ),
            (
                Field::MemoryBytes,
                format!(
                    "sum by (namespace, pod) (container_memory_working_set_bytes{})",
                    selector(&[r#"container!="""#, r#"pod!="""#], namespace)
                ),
            ),
            (
                Field::Restarts,
                format!(
                    "sum by (namespace, pod) (kube_pod_container_status_restarts_total{})",
                    selector(&[], namespace)
                ),
            ),
        ],
        Dimension::Namespace => vec![
            (
                Field::CpuCores,
                format!(
                    "sum by (namespace) (rate(container_cpu_usage_seconds_total{}[5m]))",
                    selector(&[r#"container!="""#], namespace)
                ),
            ),
            (
                Field::MemoryBytes,
                format!(
                    "sum by (namespace) (container_memory_working_set_bytes{})",
                    selector(&[r#"container!="""#], namespace)
                ),
            ),
            (
                Field::PodCount,
                format!(
                    "count by (namespace) (kube_pod_info{})",
                    selector(&[], namespace)
                ),
            ),
        ],
    }
}
