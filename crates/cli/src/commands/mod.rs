pub mod inventory;
pub mod metrics;
pub mod workload;
