//! opsgate - workload operations gateway
//!
//! Serves scale / restart / update / rollback and status for Deployments,
//! orchestrator inventory, and aggregated Prometheus metrics behind a static
//! API key.

use anyhow::{Context, Result};
use opsgate::{api, config::GatewayConfig};
use opsgate_lib::{
    gateway::{KubeOrchestrator, PrometheusGateway},
    health::{components, HealthRegistry},
    MetricsGateway, OrchestratorGateway, StructuredLogger,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from RUST_LOG
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting opsgate");

    let config = GatewayConfig::load()?;
    let api_keys = config.api_keys()?;
    info!(
        instance = %config.instance_name,
        api_keys = api_keys.len(),
        prometheus_url = %config.prometheus_url,
        "Gateway configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ORCHESTRATOR).await;
    health_registry.register(components::METRICS_BACKEND).await;

    let orchestrator: Arc<dyn OrchestratorGateway> = Arc::new(
        KubeOrchestrator::try_default()
            .await
            .context("Failed to connect to the Kubernetes API")?,
    );
    let backend: Arc<dyn MetricsGateway> = Arc::new(
        PrometheusGateway::new(config.prometheus_config())
            .context("Failed to create the metrics backend client")?,
    );

    let logger = StructuredLogger::new(&config.instance_name);
    let state = Arc::new(api::AppState::new(
        orchestrator,
        backend,
        health_registry.clone(),
        api_keys,
        config.retry_policy(),
        logger.clone(),
    ));

    health_registry.set_ready(true).await;

    let addr = config.listen_addr();
    logger.log_startup(GATEWAY_VERSION, &addr, &config.prometheus_url);

    let shutdown_logger = logger.clone();
    api::serve(&addr, state, async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_logger.log_shutdown("SIGINT received");
        }
    })
    .await?;

    info!("Shut down");
    Ok(())
}
