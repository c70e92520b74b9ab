//! Behavioural tests for the mutation engine
//!
//! These run the engine against the in-memory orchestrator, which checks the
//! concurrency token like the API server and can be made to lose races.

#[cfg(test)]
mod engine_tests {
    use crate::error::Error;
    use crate::gateway::memory::{revision, workload, InMemoryOrchestrator};
    use crate::models::{ChangeDetail, Operation, RollbackSpec, ScaleSpec, UpdateSpec, WorkloadRef};
    use crate::mutation::{
        RetryPolicy, WorkloadMutator, CHANGE_CAUSE_ANNOTATION, RESTARTED_AT_ANNOTATION,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn web() -> WorkloadRef {
        WorkloadRef::new("default", "web")
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            deadline: Duration::from_secs(5),
        }
    }

    fn mutator(orchestrator: &Arc<InMemoryOrchestrator>) -> WorkloadMutator {
        WorkloadMutator::new(orchestrator.clone()).with_policy(fast_policy())
    }

    fn scale(replicas: i32) -> ScaleSpec {
        ScaleSpec {
            target: web(),
            replicas,
        }
    }

    #[tokio::test]
    async fn test_scale_lands_on_first_attempt() {
        let orchestrator =
            Arc::new(InMemoryOrchestrator::new().with_workload(workload("default", "web", 1, &["app:v1"])));

        let change = mutator(&orchestrator).scale(&scale(3)).await.unwrap();

        assert_eq!(change.operation, Operation::Scale);
        assert_eq!(change.attempts, 1);
        assert_eq!(change.detail, ChangeDetail::Scaled { from: 1, to: 3 });
        assert_eq!(orchestrator.workload(&web()).unwrap().replicas, 3);
        assert_eq!(orchestrator.update_calls(), 1);
    }

    #[tokio::test]
    async fn test_scale_to_zero_is_allowed() {
        let orchestrator =
            Arc::new(InMemoryOrchestrator::new().with_workload(workload("default", "web", 2, &["app:v1"])));

        mutator(&orchestrator).scale(&scale(0)).await.unwrap();
        assert_eq!(orchestrator.workload(&web()).unwrap().replicas, 0);
    }

    #[tokio::test]
    async fn test_scale_retries_through_conflicts() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::new()
                .with_workload(workload("default", "web", 1, &["app:v1"]))
                .conflicting(2),
        );

        let change = mutator(&orchestrator).scale(&scale(4)).await.unwrap();

        assert_eq!(change.attempts, 3);
        assert_eq!(orchestrator.get_calls(), 3);
        assert_eq!(orchestrator.workload(&web()).unwrap().replicas, 4);
    }

    #[tokio::test]
    async fn test_persistent_conflict_exhausts_budget() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::new()
                .with_workload(workload("default", "web", 1, &["app:v1"]))
                .always_conflicting(),
        );

        let err = mutator(&orchestrator).scale(&scale(3)).await.unwrap_err();

        assert_eq!(
            err,
            Error::ConflictExhausted {
                workload: "default/web".into(),
                attempts: 5
            }
        );
        assert_eq!(orchestrator.update_calls(), 5);
        assert_eq!(orchestrator.workload(&web()).unwrap().replicas, 1);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_call() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let mutator = mutator(&orchestrator);

        assert!(matches!(
            mutator.scale(&scale(-1)).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            mutator.restart(&WorkloadRef::new("default", "")).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            mutator
                .update(&UpdateSpec {
                    target: web(),
                    ..Default::default()
                })
                .await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            mutator.restart(&WorkloadRef::new("Bad_NS", "web")).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(orchestrator.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_workload_is_not_found() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let err = mutator(&orchestrator).scale(&scale(1)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("default/web"));
    }

    #[tokio::test]
    async fn test_unavailable_surfaces_without_retry() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::new()
                .with_workload(workload("default", "web", 1, &["app:v1"]))
                .unreachable("connection refused"),
        );

        let err = mutator(&orchestrator).scale(&scale(2)).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(orchestrator.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_unavailable() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::new()
                .with_workload(workload("default", "web", 1, &["app:v1"]))
                .with_update_delay(Duration::from_millis(500)),
        );
        let mutator = WorkloadMutator::new(orchestrator.clone()).with_policy(RetryPolicy {
            deadline: Duration::from_millis(50),
            ..fast_policy()
        });

        let err = mutator.scale(&scale(2)).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(orchestrator.workload(&web()).unwrap().replicas, 1);
    }

    #[tokio::test]
    async fn test_restart_twice_changes_marker_not_image() {
        let orchestrator =
            Arc::new(InMemoryOrchestrator::new().with_workload(workload("default", "web", 2, &["app:v1"])));
        let mutator = mutator(&orchestrator);

        mutator.restart(&web()).await.unwrap();
        let first = orchestrator.workload(&web()).unwrap();
        mutator.restart(&web()).await.unwrap();
        let second = orchestrator.workload(&web()).unwrap();

        let marker = |w: &crate::models::Workload| {
            w.template_annotations
                .get(RESTARTED_AT_ANNOTATION)
                .cloned()
                .unwrap()
        };
        assert_ne!(marker(&first), marker(&second));
        assert_eq!(first.images(), vec!["app:v1".to_string()]);
        assert_eq!(second.images(), vec!["app:v1".to_string()]);
        assert!(!second.annotations.contains_key(CHANGE_CAUSE_ANNOTATION));
        // RFC 3339 with microseconds, UTC
        let stamp = marker(&second);
        assert!(stamp.ends_with('Z'));
        assert_eq!(stamp.split('.').nth(1).map(|f| f.len()), Some(7));
    }

    #[tokio::test]
    async fn test_update_image_replaces_every_container() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::new()
                .with_workload(workload("default", "web", 1, &["app:v1", "sidecar:1.0"])),
        );

        let change = mutator(&orchestrator)
            .update(&UpdateSpec {
                target: web(),
                image: Some("app:v9".into()),
                version: None,
            })
            .await
            .unwrap();

        assert_eq!(
            orchestrator.workload(&web()).unwrap().images(),
            vec!["app:v9".to_string(), "app:v9".to_string()]
        );
        assert_eq!(change.operation, Operation::Update);
    }

    #[tokio::test]
    async fn test_update_version_keeps_repository() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new().with_workload(workload(
            "default",
            "web",
            1,
            &["registry:5000/team/app:v1", "sidecar:1.0"],
        )));

        mutator(&orchestrator)
            .update(&UpdateSpec {
                target: web(),
                image: None,
                version: Some("v2".into()),
            })
            .await
            .unwrap();

        assert_eq!(
            orchestrator.workload(&web()).unwrap().images(),
            vec![
                "registry:5000/team/app:v2".to_string(),
                "sidecar:v2".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_rollback_by_version() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::new()
                .with_workload(workload("default", "web", 2, &["app:v3"]))
                .with_history(
                    web(),
                    vec![
                        revision("web-1", Some("1"), &["app:v1"]),
                        revision("web-2", Some("2"), &["app:v2"]),
                        revision("web-3", Some("3"), &["app:v3"]),
                    ],
                ),
        );

        let change = mutator(&orchestrator)
            .rollback(&RollbackSpec {
                target: web(),
                version: Some("v2".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let current = orchestrator.workload(&web()).unwrap();
        assert_eq!(current.images(), vec!["app:v2".to_string()]);
        assert_eq!(
            current.annotations.get(CHANGE_CAUSE_ANNOTATION).map(String::as_str),
            Some("Rollback to revision 2")
        );
        assert!(!current.template_annotations.contains_key(RESTARTED_AT_ANNOTATION));
        assert_eq!(
            change.detail,
            ChangeDetail::RolledBack {
                revision: "2".into(),
                images: vec!["app:v2".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_rollback_to_previous_revision() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::new()
                .with_workload(workload("default", "web", 2, &["app:v3"]))
                .with_history(
                    web(),
                    vec![
                        revision("web-3", Some("3"), &["app:v3"]),
                        revision("web-2", Some("2"), &["app:v2"]),
                    ],
                ),
        );

        mutator(&orchestrator)
            .rollback(&RollbackSpec {
                target: web(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            orchestrator.workload(&web()).unwrap().images(),
            vec!["app:v2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rollback_reads_history_once_across_retries() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::new()
                .with_workload(workload("default", "web", 2, &["app:v3"]))
                .with_history(
                    web(),
                    vec![
                        revision("web-3", Some("3"), &["app:v3"]),
                        revision("web-2", Some("2"), &["app:v2"]),
                    ],
                )
                .conflicting(2),
        );

        let change = mutator(&orchestrator)
            .rollback(&RollbackSpec {
                target: web(),
                revision_id: Some("2".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(change.attempts, 3);
        assert_eq!(orchestrator.history_reads(), 1);
    }

    #[tokio::test]
    async fn test_rollback_unknown_revision_is_not_found() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::new()
                .with_workload(workload("default", "web", 2, &["app:v3"]))
                .with_history(web(), vec![revision("web-3", Some("3"), &["app:v3"])]),
        );

        let err = mutator(&orchestrator)
            .rollback(&RollbackSpec {
                target: web(),
                revision_id: Some("7".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(orchestrator.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_rollback_to_empty_revision_is_rejected() {
        let orchestrator = Arc::new(
            InMemoryOrchestrator::new()
                .with_workload(workload("default", "web", 2, &["app:v3"]))
                .with_history(web(), vec![revision("web-0", Some("1"), &[])]),
        );

        let err = mutator(&orchestrator)
            .rollback(&RollbackSpec {
                target: web(),
                revision_id: Some("1".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(orchestrator.update_calls(), 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(40));
        assert_eq!(policy.backoff_after(4), Duration::from_millis(50));
        assert_eq!(policy.backoff_after(40), Duration::from_millis(50));
    }
}
