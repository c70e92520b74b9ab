//! Orchestrator inventory commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{
    ApiClient, ClusterInventory, NamespaceSummary, NodeSummary, PodSummary, WorkloadStatus,
    WorkloadSummary,
};
use crate::output::{color_replicas, color_status, print_json, print_rows, OutputFormat};

const INVENTORY: &str = "api/v1/kubernetes/metrics";

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
}

#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Pod IP")]
    pod_ip: String,
    #[tabled(rename = "Containers")]
    containers: usize,
}

#[derive(Tabled)]
struct NamespaceRow {
    #[tabled(rename = "Namespace")]
    name: String,
    #[tabled(rename = "Pods")]
    total: usize,
    #[tabled(rename = "Running")]
    running: usize,
    #[tabled(rename = "Pending")]
    pending: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
}

#[derive(Tabled)]
struct DeploymentRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "Available")]
    available: i32,
}

fn with_namespace(path: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{}?namespace={}", path, ns),
        None => path.to_string(),
    }
}

/// Node and pod counts for the whole cluster
pub async fn cluster(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let inventory: ClusterInventory = client.get(&format!("{}/cluster", INVENTORY)).await?;

    match format {
        OutputFormat::Json => print_json(&inventory)?,
        OutputFormat::Table => {
            println!("{}", "Cluster Inventory".bold());
            println!("{}", "=".repeat(50));
            println!(
                "Nodes:      {} ready of {}",
                inventory.nodes.ready.to_string().green(),
                inventory.nodes.total
            );
            println!("Pods:       {}", inventory.pods.total);
            println!("  Running:  {}", inventory.pods.running.to_string().green());
            println!("  Pending:  {}", inventory.pods.pending.to_string().yellow());
            println!("  Failed:   {}", inventory.pods.failed.to_string().red());
            println!("  Succeeded:{}", inventory.pods.succeeded);
            println!();
            println!(
                "As of: {}",
                inventory
                    .timestamp
                    .format("%Y-%m-%d %H:%M:%S UTC")
                    .to_string()
                    .dimmed()
            );
        }
    }

    Ok(())
}

pub async fn nodes(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let nodes: Vec<NodeSummary> = client.get(&format!("{}/nodes", INVENTORY)).await?;

    match format {
        OutputFormat::Json => print_json(&nodes)?,
        OutputFormat::Table => print_rows(
            nodes
                .into_iter()
                .map(|n| NodeRow {
                    status: color_status(&n.status),
                    cpu: n.allocatable.get("cpu").cloned().unwrap_or_default(),
                    memory: n.allocatable.get("memory").cloned().unwrap_or_default(),
                    name: n.name,
                })
                .collect(),
        ),
    }

    Ok(())
}

pub async fn pods(client: &ApiClient, namespace: Option<&str>, format: OutputFormat) -> Result<()> {
    let pods: Vec<PodSummary> = client
        .get(&with_namespace(&format!("{}/pods", INVENTORY), namespace))
        .await?;

    match format {
        OutputFormat::Json => print_json(&pods)?,
        OutputFormat::Table => print_rows(
            pods.into_iter()
                .map(|p| PodRow {
                    phase: color_status(&p.status),
                    pod_ip: p.pod_ip.unwrap_or_default(),
                    containers: p.containers,
                    namespace: p.namespace,
                    name: p.name,
                })
                .collect(),
        ),
    }

    Ok(())
}

pub async fn namespaces(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let namespaces: Vec<NamespaceSummary> =
        client.get(&format!("{}/namespaces", INVENTORY)).await?;

    match format {
        OutputFormat::Json => print_json(&namespaces)?,
        OutputFormat::Table => print_rows(
            namespaces
                .into_iter()
                .map(|n| NamespaceRow {
                    total: n.pods.total,
                    running: n.pods.running,
                    pending: n.pods.pending,
                    failed: n.pods.failed,
                    name: n.name,
                })
                .collect(),
        ),
    }

    Ok(())
}

/// List deployments, or show one when `name` is given
pub async fn deployments(
    client: &ApiClient,
    namespace: Option<&str>,
    name: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    if let Some(name) = name {
        let status: WorkloadStatus = client
            .get(&with_namespace(
                &format!("{}/deployments/{}", INVENTORY, name),
                namespace,
            ))
            .await?;
        return match format {
            OutputFormat::Json => print_json(&status),
            OutputFormat::Table => {
                print_rows(vec![DeploymentRow {
                    ready: color_replicas(status.ready, status.desired),
                    available: status.available,
                    namespace: status.namespace,
                    name: status.name,
                }]);
                Ok(())
            }
        };
    }

    let workloads: Vec<WorkloadSummary> = client
        .get(&with_namespace(&format!("{}/deployments", INVENTORY), namespace))
        .await?;

    match format {
        OutputFormat::Json => print_json(&workloads)?,
        OutputFormat::Table => print_rows(
            workloads
                .into_iter()
                .map(|w| DeploymentRow {
                    ready: color_replicas(w.ready, w.replicas),
                    available: w.available,
                    namespace: w.namespace,
                    name: w.name,
                })
                .collect(),
        ),
    }

    Ok(())
}
