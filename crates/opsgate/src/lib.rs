//! Operations gateway: HTTP surface over the workload mutation engine,
//! status and inventory reporters, and the metrics aggregator.

pub mod api;
pub mod auth;
pub mod config;
