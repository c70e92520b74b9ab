//! Core library for the workload operations gateway
//!
//! This crate provides the core functionality for:
//! - Workload mutation (scale, restart, update, rollback) with optimistic concurrency
//! - Revision resolution for rollbacks
//! - Cross-query metrics aggregation from the metrics backend
//! - Workload status and cluster inventory reporting
//! - Health checks and observability

pub mod aggregator;
pub mod error;
pub mod gateway;
pub mod health;
pub mod inventory;
pub mod models;
pub mod mutation;
pub mod observability;
pub mod status;
pub mod validation;

pub use aggregator::{AggregatedMetrics, BasicMetrics, Dimension, MetricsAggregator};
pub use error::{Error, Result};
pub use gateway::{MetricsGateway, OrchestratorGateway};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use inventory::InventoryReporter;
pub use models::*;
pub use mutation::{resolve_revision, RetryPolicy, WorkloadMutator};
pub use observability::{OpsMetrics, StructuredLogger};
pub use status::StatusReporter;
