//! Workload mutation and status commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{
    AppliedChange, ApiClient, ChangeDetail, RollbackRequest, ScaleRequest, TargetRequest,
    UpdateRequest, WorkloadStatus,
};
use crate::output::{color_replicas, color_status, print_json, print_rows, print_success, OutputFormat};

const SERVICE: &str = "api/v1/kubernetes/service";

/// Row for the conditions table
#[derive(Tabled)]
struct ConditionRow {
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn target(namespace: &str, name: &str) -> TargetRequest {
    TargetRequest {
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Scale a deployment
pub async fn scale(
    client: &ApiClient,
    namespace: &str,
    name: &str,
    replicas: i32,
    format: OutputFormat,
) -> Result<()> {
    let request = ScaleRequest {
        target: target(namespace, name),
        replicas,
    };
    let change: AppliedChange = client.post(&format!("{}/scale", SERVICE), &request).await?;
    report(&change, format)
}

/// Trigger a rolling restart
pub async fn restart(
    client: &ApiClient,
    namespace: &str,
    name: &str,
    format: OutputFormat,
) -> Result<()> {
    let change: AppliedChange = client
        .post(&format!("{}/restart", SERVICE), &target(namespace, name))
        .await?;
    report(&change, format)
}

/// Change the container image(s)
pub async fn update(
    client: &ApiClient,
    namespace: &str,
    name: &str,
    image: Option<String>,
    version: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let request = UpdateRequest {
        target: target(namespace, name),
        image,
        version,
    };
    let change: AppliedChange = client.post(&format!("{}/update", SERVICE), &request).await?;
    report(&change, format)
}

/// Roll back to an earlier revision
pub async fn rollback(
    client: &ApiClient,
    namespace: &str,
    name: &str,
    revision: Option<String>,
    image: Option<String>,
    version: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let request = RollbackRequest {
        target: target(namespace, name),
        revision_id: revision,
        revision_image: image,
        version,
    };
    let change: AppliedChange = client
        .post(&format!("{}/rollback", SERVICE), &request)
        .await?;
    report(&change, format)
}

/// Show the status snapshot of a deployment
pub async fn status(
    client: &ApiClient,
    namespace: &str,
    name: &str,
    format: OutputFormat,
) -> Result<()> {
    let status: WorkloadStatus = client
        .post(&format!("{}/status", SERVICE), &target(namespace, name))
        .await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            println!("{}", "Deployment Status".bold());
            println!("{}", "=".repeat(50));
            println!("Name:        {}", status.name.cyan());
            println!("Namespace:   {}", status.namespace.cyan());
            println!("Ready:       {}", color_replicas(status.ready, status.desired));
            println!("Replicas:    {}", status.replicas);
            println!("Available:   {}", status.available);
            println!("Updated:     {}", status.updated);
            println!("Unavailable: {}", status.unavailable);
            if let Some(created) = status.creation_timestamp {
                println!(
                    "Created:     {}",
                    created.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed()
                );
            }
            println!();

            let rows: Vec<ConditionRow> = status
                .conditions
                .iter()
                .map(|c| ConditionRow {
                    kind: c.type_.clone(),
                    status: color_status(&c.status),
                    reason: c.reason.clone().unwrap_or_default(),
                    message: c.message.clone().unwrap_or_default(),
                })
                .collect();
            print_rows(rows);
        }
    }

    Ok(())
}

fn report(change: &AppliedChange, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(change);
    }

    let target = format!("{}/{}", change.namespace, change.name);
    let summary = match &change.detail {
        ChangeDetail::Scaled { from, to } => {
            format!("Scaled {} from {} to {} replicas", target, from, to)
        }
        ChangeDetail::Restarted { restarted_at } => {
            format!("Restarted {} at {}", target, restarted_at)
        }
        ChangeDetail::Updated { images } => {
            format!("Updated {} to {}", target, images.join(", "))
        }
        ChangeDetail::RolledBack { revision, images } => format!(
            "Rolled back {} to revision {} ({})",
            target,
            revision,
            images.join(", ")
        ),
    };
    print_success(&summary);
    if change.attempts > 1 {
        println!(
            "  {}",
            format!("applied after {} attempts", change.attempts).dimmed()
        );
    }
    Ok(())
}
