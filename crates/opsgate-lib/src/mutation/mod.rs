//! Workload mutation with optimistic concurrency
//!
//! Every mutation follows the same cycle: read the workload together with its
//! concurrency token, compute the desired state in memory, and submit it
//! guarded by the token. A stale token means another writer got there first;
//! the cycle then backs off and starts over from a fresh read. Other failures
//! surface immediately. The whole operation runs under one deadline.

mod image;
mod resolver;

#[cfg(test)]
mod tests;

pub use image::{image_repository, image_tag, matches_version, with_tag};
pub use resolver::resolve_revision;

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{within, Error, Result, DEFAULT_DEADLINE};
use crate::gateway::OrchestratorGateway;
use crate::models::{
    non_empty, AppliedChange, ChangeDetail, Operation, RollbackSpec, ScaleSpec, UpdateSpec,
    Workload, WorkloadRef,
};
use crate::observability::{OpsMetrics, StructuredLogger};

pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";
pub const CHANGE_CAUSE_ANNOTATION: &str = "kubernetes.io/change-cause";

/// Bounds for the conditional-update loop
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Submissions allowed before giving up on a contended workload
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Wall-clock bound for the whole operation, reads included
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            deadline: DEFAULT_DEADLINE,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Outcome of a single read-compute-submit cycle
enum Attempt {
    Landed(ChangeDetail),
    Stale(Error),
}

/// Applies scale, restart, update and rollback to workloads
#[derive(Clone)]
pub struct WorkloadMutator {
    orchestrator: Arc<dyn OrchestratorGateway>,
    policy: RetryPolicy,
    metrics: OpsMetrics,
    logger: StructuredLogger,
}

impl WorkloadMutator {
    pub fn new(orchestrator: Arc<dyn OrchestratorGateway>) -> Self {
        Self {
            orchestrator,
            policy: RetryPolicy::default(),
            metrics: OpsMetrics::new(),
            logger: StructuredLogger::new("opsgate"),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Set the desired replica count
    pub async fn scale(&self, spec: &ScaleSpec) -> Result<AppliedChange> {
        spec.validate()?;
        let to = spec.replicas;
        let work = self.converge(&spec.target, move |w: &mut Workload| {
            let from = w.replicas;
            w.replicas = to;
            Ok(ChangeDetail::Scaled { from, to })
        });
        self.finish(Operation::Scale, &spec.target, work).await
    }

    /// Roll every pod by stamping a fresh restart marker on the pod template
    pub async fn restart(&self, target: &WorkloadRef) -> Result<AppliedChange> {
        target.validate()?;
        let work = self.converge(target, |w: &mut Workload| {
            let stamp = restart_marker(w.template_annotations.get(RESTARTED_AT_ANNOTATION));
            w.template_annotations
                .insert(RESTARTED_AT_ANNOTATION.to_string(), stamp.clone());
            Ok(ChangeDetail::Restarted { restarted_at: stamp })
        });
        self.finish(Operation::Restart, target, work).await
    }

    /// Replace every container image, or only the tag when a version is given
    pub async fn update(&self, spec: &UpdateSpec) -> Result<AppliedChange> {
        spec.validate()?;
        let image = non_empty(&spec.image).map(str::to_string);
        let version = non_empty(&spec.version).map(str::to_string);
        let work = self.converge(&spec.target, move |w: &mut Workload| {
            for container in &mut w.containers {
                let next = match (&image, &version, container.image.as_deref()) {
                    (Some(image), _, _) => Some(image.clone()),
                    (None, Some(version), Some(current)) => Some(with_tag(current, version)),
                    (None, _, current) => current.map(str::to_string),
                };
                container.image = next;
            }
            Ok(ChangeDetail::Updated { images: w.images() })
        });
        self.finish(Operation::Update, &spec.target, work).await
    }

    /// Restore the container specs of an earlier revision.
    ///
    /// History is read and resolved once; retries reuse the resolved target.
    pub async fn rollback(&self, spec: &RollbackSpec) -> Result<AppliedChange> {
        spec.validate()?;
        let target = &spec.target;
        let work = async {
            let history = self.orchestrator.list_revision_history(target).await?;
            let record = resolve_revision(&history, spec)?;
            if record.containers.is_empty() {
                return Err(Error::Validation(format!(
                    "revision {} of {} has no containers",
                    record.label(),
                    target
                )));
            }
            let label = record.label().to_string();
            debug!(
                namespace = %target.namespace,
                name = %target.name,
                revision = %label,
                "Resolved rollback target"
            );
            let cause = format!("Rollback to revision {}", label);
            self.converge(target, move |w: &mut Workload| {
                w.containers = record.containers.clone();
                w.annotations
                    .insert(CHANGE_CAUSE_ANNOTATION.to_string(), cause.clone());
                Ok(ChangeDetail::RolledBack {
                    revision: label.clone(),
                    images: w.images(),
                })
            })
            .await
        };
        self.finish(Operation::Rollback, target, work).await
    }

    /// Run `work` under the deadline, then record and log the outcome
    async fn finish<F>(&self, operation: Operation, target: &WorkloadRef, work: F) -> Result<AppliedChange>
    where
        F: Future<Output = Result<(u32, ChangeDetail)>>,
    {
        let result = within(self.policy.deadline, target, work).await;

        match result {
            Ok((attempts, detail)) => {
                let change = AppliedChange {
                    name: target.name.clone(),
                    namespace: target.namespace.clone(),
                    operation,
                    attempts,
                    detail,
                };
                self.metrics.record_mutation(operation, "success");
                self.metrics.observe_attempts(attempts);
                self.logger.log_mutation(&change);
                Ok(change)
            }
            Err(err) => {
                let err = err.context(operation);
                self.metrics.record_mutation(operation, err.kind());
                self.logger.log_mutation_failure(operation, target, &err);
                Err(err)
            }
        }
    }

    /// Repeat read-compute-submit until a submission lands or the budget is spent
    async fn converge<F>(&self, target: &WorkloadRef, mut apply: F) -> Result<(u32, ChangeDetail)>
    where
        F: FnMut(&mut Workload) -> Result<ChangeDetail> + Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.attempt(target, &mut apply).await? {
                Attempt::Landed(detail) => return Ok((attempt, detail)),
                Attempt::Stale(err) => {
                    if attempt == max_attempts {
                        break;
                    }
                    let backoff = self.policy.backoff_after(attempt);
                    debug!(
                        namespace = %target.namespace,
                        name = %target.name,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Concurrency token was stale, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Err(Error::ConflictExhausted {
            workload: target.to_string(),
            attempts: max_attempts,
        })
    }

    async fn attempt<F>(&self, target: &WorkloadRef, apply: &mut F) -> Result<Attempt>
    where
        F: FnMut(&mut Workload) -> Result<ChangeDetail> + Send,
    {
        let mut desired = self.orchestrator.get_workload(target).await?;
        let detail = apply(&mut desired)?;

        match self.orchestrator.update_workload(&desired).await {
            Ok(()) => Ok(Attempt::Landed(detail)),
            Err(err) if err.is_conflict() => Ok(Attempt::Stale(err)),
            Err(err) => Err(err),
        }
    }
}

/// Current time in RFC 3339 with microseconds, always later than `previous`
fn restart_marker(previous: Option<&String>) -> String {
    let mut now = Utc::now();
    if let Some(prev) = previous.and_then(|p| DateTime::parse_from_rfc3339(p).ok()) {
        let prev = prev.with_timezone(&Utc);
        if prev >= now {
            now = prev + ChronoDuration::microseconds(1);
        }
    }
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}
