//! Metrics backend commands

use anyhow::Result;
use chrono::{DateTime, Utc};
use tabled::Tabled;

use crate::client::{ApiClient, BasicMetrics, MetricList, MetricSample, MetricsRecord, QueryRequest};
use crate::output::{
    color_percent, color_status, format_bytes, format_cores, print_json, print_rows, OutputFormat,
};

#[derive(Tabled)]
struct UsageRow {
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Disk / Restarts / Pods")]
    extra: String,
}

#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "Labels")]
    labels: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn usage_row(record: MetricsRecord) -> UsageRow {
    let entity = match (&record.namespace, &record.pod, &record.instance) {
        (Some(ns), Some(pod), _) => format!("{}/{}", ns, pod),
        (Some(ns), None, _) => ns.clone(),
        (_, _, Some(instance)) => instance.clone(),
        _ => "cluster".to_string(),
    };

    let cpu = match (record.cpu_usage_percent, record.cpu_usage_cores) {
        (Some(pct), _) => color_percent(pct),
        (_, Some(cores)) => format_cores(cores),
        _ => "-".to_string(),
    };
    let memory = match (record.memory_usage_percent, record.memory_working_set_bytes) {
        (Some(pct), _) => color_percent(pct),
        (_, Some(bytes)) => format_bytes(bytes),
        _ => "-".to_string(),
    };
    let extra = if let Some(disk) = record.disk_usage_percent {
        match (record.node_count, record.pod_count) {
            (Some(nodes), Some(pods)) => {
                format!("{} / {} nodes / {} pods", color_percent(disk), nodes, pods)
            }
            _ => color_percent(disk),
        }
    } else if let Some(restarts) = record.restarts {
        restarts.to_string()
    } else if let Some(pods) = record.pod_count {
        pods.to_string()
    } else {
        "-".to_string()
    };

    UsageRow {
        entity,
        cpu,
        memory,
        extra,
    }
}

fn labels(sample: &MetricSample) -> String {
    let parts: Vec<String> = sample
        .labels
        .iter()
        .map(|(k, v)| format!("{}={:?}", k, v))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

fn print_samples(samples: Vec<MetricSample>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&samples)?,
        OutputFormat::Table => print_rows(
            samples
                .iter()
                .map(|s| SampleRow {
                    labels: labels(s),
                    value: format!("{}", s.value),
                })
                .collect(),
        ),
    }
    Ok(())
}

fn with_params(path: String, namespace: Option<&str>, time: Option<DateTime<Utc>>) -> String {
    let mut params = Vec::new();
    if let Some(ns) = namespace {
        params.push(format!("namespace={}", ns));
    }
    if let Some(t) = time {
        params.push(format!("time={}", t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)));
    }
    if params.is_empty() {
        path
    } else {
        format!("{}?{}", path, params.join("&"))
    }
}

/// Aggregated usage per dimension: cluster, nodes, pods or namespaces
pub async fn show(
    client: &ApiClient,
    dimension: &str,
    namespace: Option<&str>,
    time: Option<DateTime<Utc>>,
    format: OutputFormat,
) -> Result<()> {
    let path = with_params(
        format!("api/v1/prometheus/metrics/{}", dimension),
        namespace,
        time,
    );
    let records: Vec<MetricsRecord> = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Table => print_rows(records.into_iter().map(usage_row).collect()),
    }
    Ok(())
}

/// Scrape-target liveness with process CPU and memory
pub async fn basic(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let basic: BasicMetrics = client.get("api/v1/prometheus/metrics/basic").await?;

    match format {
        OutputFormat::Json => print_json(&basic)?,
        OutputFormat::Table => {
            let up = if basic.up_status { "Ready" } else { "NotReady" };
            println!("Up:     {}", color_status(up));
            println!("CPU:    {}", format_cores(basic.cpu_usage));
            println!("Memory: {}", format_bytes(basic.memory_usage));
            if let Some(at) = basic.timestamp {
                println!("At:     {}", at.to_rfc3339());
            }
        }
    }
    Ok(())
}

/// Names of every series the backend holds
pub async fn list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let list: MetricList = client.get("api/v1/prometheus/metrics/list").await?;

    match format {
        OutputFormat::Json => print_json(&list)?,
        OutputFormat::Table => {
            for name in &list.metrics {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

/// Current value of one named series
pub async fn series(
    client: &ApiClient,
    name: &str,
    time: Option<DateTime<Utc>>,
    format: OutputFormat,
) -> Result<()> {
    let path = with_params(format!("api/v1/prometheus/series/{}", name), None, time);
    let samples: Vec<MetricSample> = client.get(&path).await?;
    print_samples(samples, format)
}

/// Run an arbitrary instant query
pub async fn query(
    client: &ApiClient,
    expression: &str,
    time: Option<DateTime<Utc>>,
    format: OutputFormat,
) -> Result<()> {
    let request = QueryRequest {
        query: expression.to_string(),
        time,
    };
    let samples: Vec<MetricSample> = client.post("api/v1/prometheus/query", &request).await?;
    print_samples(samples, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: serde_json::Value) -> MetricsRecord {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_usage_row_entities() {
        let pod = usage_row(record(serde_json::json!({
            "dimension": "pod", "namespace": "default", "pod": "a",
            "cpuUsageCores": 0.5, "memoryWorkingSetBytes": 2048.0, "restarts": 3
        })));
        assert_eq!(pod.entity, "default/a");
        assert_eq!(pod.cpu, "500m");
        assert_eq!(pod.memory, "2.00Ki");
        assert_eq!(pod.extra, "3");

        let cluster = usage_row(record(serde_json::json!({"dimension": "cluster"})));
        assert_eq!(cluster.entity, "cluster");
        assert_eq!(cluster.cpu, "-");
    }

    #[test]
    fn test_query_params() {
        assert_eq!(with_params("p".into(), None, None), "p");
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            with_params("p".into(), Some("prod"), Some(at)),
            "p?namespace=prod&time=2024-05-01T10:00:00Z"
        );
    }
}
