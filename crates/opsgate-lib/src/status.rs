//! Workload status snapshots

use std::sync::Arc;
use std::time::Duration;

use crate::error::{within, Result, DEFAULT_DEADLINE};
use crate::gateway::OrchestratorGateway;
use crate::models::{WorkloadRef, WorkloadStatus};

/// Reads a workload and returns its flat status. Nothing is cached.
#[derive(Clone)]
pub struct StatusReporter {
    orchestrator: Arc<dyn OrchestratorGateway>,
    deadline: Duration,
}

impl StatusReporter {
    pub fn new(orchestrator: Arc<dyn OrchestratorGateway>) -> Self {
        Self {
            orchestrator,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn get_status(&self, target: &WorkloadRef) -> Result<WorkloadStatus> {
        target.validate()?;
        let workload = within(self.deadline, target, self.orchestrator.get_workload(target))
            .await
            .map_err(|e| e.context("status"))?;

        let mut status = workload.status;
        if status.name.is_empty() {
            status.name = target.name.clone();
        }
        if status.namespace.is_empty() {
            status.namespace = target.namespace.clone();
        }
        Ok(status)
    }
}
