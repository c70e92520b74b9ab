//! HTTP API: health checks, Prometheus exposition and the authenticated operations surface

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        MatchedPath, Path, Query, Request, State,
    },
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use opsgate_lib::{
    health::{components, ComponentStatus, HealthRegistry},
    inventory::{ClusterInventory, NamespaceSummary},
    AggregatedMetrics, AppliedChange, BasicMetrics, Dimension, Error, InventoryReporter, MetricQuery,
    MetricSample, MetricsAggregator, MetricsGateway, NodeSummary, OpsMetrics,
    OrchestratorGateway, PodSummary, RetryPolicy, RollbackSpec, ScaleSpec, StatusReporter,
    StructuredLogger, UpdateSpec, WorkloadMutator, WorkloadRef, WorkloadStatus, WorkloadSummary,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::ApiKeys;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: OpsMetrics,
    pub api_keys: ApiKeys,
    pub mutator: WorkloadMutator,
    pub status: StatusReporter,
    pub inventory: InventoryReporter,
    pub aggregator: MetricsAggregator,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<dyn OrchestratorGateway>,
        backend: Arc<dyn MetricsGateway>,
        health_registry: HealthRegistry,
        api_keys: ApiKeys,
        policy: RetryPolicy,
        logger: StructuredLogger,
    ) -> Self {
        let deadline = policy.deadline;
        Self {
            health_registry,
            metrics: OpsMetrics::new(),
            api_keys,
            mutator: WorkloadMutator::new(orchestrator.clone())
                .with_policy(policy)
                .with_logger(logger.clone()),
            status: StatusReporter::new(orchestrator.clone()).with_deadline(deadline),
            inventory: InventoryReporter::new(orchestrator).with_deadline(deadline),
            aggregator: MetricsAggregator::new(backend).with_logger(logger),
        }
    }

    /// Feed the outcome of a backend call into component health
    async fn observe<T>(&self, component: &str, result: &opsgate_lib::Result<T>) {
        self.health_registry
            .observe(component, result.as_ref().map(|_| ()))
            .await;
    }

    async fn orchestrator_call<T>(
        &self,
        call: impl Future<Output = opsgate_lib::Result<T>>,
    ) -> opsgate_lib::Result<T> {
        let result = call.await;
        self.observe(components::ORCHESTRATOR, &result).await;
        result
    }

    async fn metrics_call<T>(
        &self,
        call: impl Future<Output = opsgate_lib::Result<T>>,
    ) -> opsgate_lib::Result<T> {
        let result = call.await;
        self.observe(components::METRICS_BACKEND, &result).await;
        result
    }
}

/// Response envelope shared by every `/api` route
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn success<T: Serialize>(message: impl Into<String>, data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        status: "success".to_string(),
        message: message.into(),
        data: Some(data),
        error: None,
    })
}

/// Error half of the envelope, with its HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error: error.into(),
        }
    }

    fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Invalid request", error)
    }

    fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "missing or invalid API key",
        )
    }

    fn no_data(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "No data", what)
    }
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) | Error::ConflictExhausted { .. } => StatusCode::CONFLICT,
        Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = status_for(&err);
        let message = match status {
            StatusCode::BAD_REQUEST => "Invalid request",
            StatusCode::NOT_FOUND => "Not found",
            StatusCode::CONFLICT => "Conflict",
            StatusCode::SERVICE_UNAVAILABLE => "Backend unavailable",
            _ => "Internal error",
        };
        Self::new(status, message, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = self.status.as_u16(), error = %self.error, "Request failed");
        }
        let body = Envelope::<()> {
            status: "error".to_string(),
            message: self.message,
            data: None,
            error: Some(self.error),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

// Health and exposition

/// 200 while healthy or degraded, 503 when a component is down
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn ping() -> Json<Envelope<String>> {
    success("Pong", "Pong".to_string())
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found", "no such route")
}

// Workload operations

async fn scale(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ScaleSpec>, JsonRejection>,
) -> ApiResult<AppliedChange> {
    let Json(spec) = body?;
    let change = state
        .orchestrator_call(state.mutator.scale(&spec))
        .await?;
    Ok(success(
        format!("Scaled {} to {} replicas", spec.target, spec.replicas),
        change,
    ))
}

async fn restart(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WorkloadRef>, JsonRejection>,
) -> ApiResult<AppliedChange> {
    let Json(target) = body?;
    let change = state
        .orchestrator_call(state.mutator.restart(&target))
        .await?;
    Ok(success(format!("Restarted {}", target), change))
}

async fn update(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UpdateSpec>, JsonRejection>,
) -> ApiResult<AppliedChange> {
    let Json(spec) = body?;
    let change = state
        .orchestrator_call(state.mutator.update(&spec))
        .await?;
    Ok(success(format!("Updated {}", spec.target), change))
}

async fn rollback(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RollbackSpec>, JsonRejection>,
) -> ApiResult<AppliedChange> {
    let Json(spec) = body?;
    let change = state
        .orchestrator_call(state.mutator.rollback(&spec))
        .await?;
    Ok(success(format!("Rolled back {}", spec.target), change))
}

async fn workload_status(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WorkloadRef>, JsonRejection>,
) -> ApiResult<WorkloadStatus> {
    let Json(target) = body?;
    let status = state
        .orchestrator_call(state.status.get_status(&target))
        .await?;
    Ok(success(format!("Status of {}", target), status))
}

// Orchestrator inventory

#[derive(Debug, Default, Deserialize)]
pub struct InventoryParams {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

async fn cluster_inventory(State(state): State<Arc<AppState>>) -> ApiResult<ClusterInventory> {
    let inventory = state
        .orchestrator_call(state.inventory.cluster())
        .await?;
    Ok(success("Cluster inventory", inventory))
}

async fn nodes(
    State(state): State<Arc<AppState>>,
    params: Result<Query<InventoryParams>, QueryRejection>,
) -> ApiResult<Vec<NodeSummary>> {
    let Query(params) = params?;
    let nodes = state
        .orchestrator_call(state.inventory.nodes(params.name.as_deref()))
        .await?;
    Ok(success(format!("{} nodes", nodes.len()), nodes))
}

async fn pods(
    State(state): State<Arc<AppState>>,
    params: Result<Query<InventoryParams>, QueryRejection>,
) -> ApiResult<Vec<PodSummary>> {
    let Query(params) = params?;
    let pods = state
        .orchestrator_call(state.inventory.pods(params.namespace.as_deref()))
        .await?;
    Ok(success(format!("{} pods", pods.len()), pods))
}

async fn namespaces(State(state): State<Arc<AppState>>) -> ApiResult<Vec<NamespaceSummary>> {
    let namespaces = state
        .orchestrator_call(state.inventory.namespaces())
        .await?;
    Ok(success(format!("{} namespaces", namespaces.len()), namespaces))
}

async fn deployments(
    State(state): State<Arc<AppState>>,
    params: Result<Query<InventoryParams>, QueryRejection>,
) -> ApiResult<Vec<WorkloadSummary>> {
    let Query(params) = params?;
    let workloads = state
        .orchestrator_call(state.inventory.workloads(params.namespace.as_deref()))
        .await?;
    Ok(success(format!("{} deployments", workloads.len()), workloads))
}

async fn deployment(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    params: Result<Query<InventoryParams>, QueryRejection>,
) -> ApiResult<WorkloadStatus> {
    let Query(params) = params?;
    let target = WorkloadRef::new(params.namespace.unwrap_or_default(), name);
    let status = state
        .orchestrator_call(state.status.get_status(&target))
        .await?;
    Ok(success(format!("Status of {}", target), status))
}

// Metrics backend

#[derive(Debug, Default, Deserialize)]
pub struct MetricsParams {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

async fn aggregated_metrics(
    State(state): State<Arc<AppState>>,
    Path(dimension): Path<String>,
    params: Result<Query<MetricsParams>, QueryRejection>,
) -> ApiResult<Vec<AggregatedMetrics>> {
    let Query(params) = params?;
    let dimension: Dimension = dimension.parse()?;
    let records = state
        .metrics_call(
            state
                .aggregator
                .aggregate(dimension, params.namespace.as_deref(), params.time),
        )
        .await?;
    if records.is_empty() {
        return Err(ApiError::no_data(format!("no {} metrics available", dimension)));
    }
    Ok(success(
        format!("{} {} records", records.len(), dimension),
        records,
    ))
}

async fn basic_metrics(State(state): State<Arc<AppState>>) -> ApiResult<BasicMetrics> {
    let basic = state.metrics_call(state.aggregator.basic()).await?;
    Ok(success("basic metrics", basic))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricList {
    pub metrics: Vec<String>,
}

async fn metric_list(State(state): State<Arc<AppState>>) -> ApiResult<MetricList> {
    let metrics = state
        .metrics_call(state.aggregator.metric_names())
        .await?;
    Ok(success(format!("{} metrics", metrics.len()), MetricList { metrics }))
}

async fn series(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    params: Result<Query<MetricsParams>, QueryRejection>,
) -> ApiResult<Vec<MetricSample>> {
    let Query(params) = params?;
    let samples = state
        .metrics_call(state.aggregator.series(&name, params.time))
        .await?;
    if samples.is_empty() {
        return Err(ApiError::no_data(format!("no samples for metric {}", name)));
    }
    Ok(success(format!("{} samples", samples.len()), samples))
}

async fn custom_query(
    State(state): State<Arc<AppState>>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Vec<MetricSample>> {
    let Json(request) = body?;
    let query = MetricQuery::new(request.query).at(request.time);
    let samples = state
        .metrics_call(state.aggregator.query(&query))
        .await?;
    Ok(success(format!("{} samples", samples.len()), samples))
}

// Middleware

async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if state.api_keys.authorize(header) {
        next.run(request).await
    } else {
        ApiError::unauthorized().into_response()
    }
}

async fn track_requests(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    state
        .metrics
        .inc_http_request(&method, &path, response.status().as_u16());
    response
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let workload_routes = Router::new()
        .route("/scale", post(scale))
        .route("/restart", post(restart))
        .route("/rollback", post(rollback))
        .route("/update", post(update))
        .route("/status", post(workload_status));

    let inventory_routes = Router::new()
        .route("/cluster", get(cluster_inventory))
        .route("/nodes", get(nodes))
        .route("/pods", get(pods))
        .route("/namespaces", get(namespaces))
        .route("/deployments", get(deployments))
        .route("/deployments/:name", get(deployment));

    let prometheus_routes = Router::new()
        .route("/metrics/basic", get(basic_metrics))
        .route("/metrics/list", get(metric_list))
        .route("/metrics/:dimension", get(aggregated_metrics))
        .route("/series/:name", get(series))
        .route("/query", post(custom_query));

    let v1 = Router::new()
        .route("/ping", get(ping))
        .route("/scale", post(scale))
        .route("/restart", post(restart))
        .route("/rollback", post(rollback))
        .nest("/kubernetes/service", workload_routes)
        .nest("/kubernetes/metrics", inventory_routes)
        .nest("/prometheus", prometheus_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/ping", get(ping))
        .nest("/api/v1", v1)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the API server and run until `shutdown` resolves
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
