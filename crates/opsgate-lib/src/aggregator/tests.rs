//! Join and fan-out tests for the aggregator

#[cfg(test)]
mod join_tests {
    use crate::aggregator::queries::{self, plan};
    use crate::aggregator::{
        AggregatedMetrics, BasicMetrics, ClusterMetrics, Dimension, Field, MetricsAggregator, NodeMetrics,
        PodMetrics,
    };
    use crate::error::Error;
    use crate::gateway::memory::{sample, StaticMetrics};
    use crate::models::MetricQuery;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn expression(dimension: Dimension, namespace: Option<&str>, field: Field) -> String {
        plan(dimension, namespace)
            .into_iter()
            .find(|(f, _)| *f == field)
            .map(|(_, e)| e)
            .unwrap()
    }

    fn pod(ns: &str, name: &str, value: f64) -> crate::models::MetricSample {
        sample(&[("namespace", ns), ("pod", name)], value)
    }

    #[tokio::test]
    async fn test_pod_join_fills_missing_fields_with_zero() {
        let backend = StaticMetrics::new()
            .answer(
                expression(Dimension::Pod, None, Field::CpuCores),
                vec![pod("default", "a", 0.5), pod("default", "b", 0.25)],
            )
            .answer(
                expression(Dimension::Pod, None, Field::MemoryBytes),
                vec![pod("default", "b", 2048.0), pod("default", "c", 4096.0)],
            );
        let aggregator = MetricsAggregator::new(Arc::new(backend));

        let records = aggregator
            .aggregate(Dimension::Pod, None, None)
            .await
            .unwrap();

        assert_eq!(
            records,
            vec![
                AggregatedMetrics::Pod(PodMetrics {
                    namespace: "default".into(),
                    pod: "a".into(),
                    cpu_usage_cores: 0.5,
                    memory_working_set_bytes: 0.0,
                    restarts: 0,
                }),
                AggregatedMetrics::Pod(PodMetrics {
                    namespace: "default".into(),
                    pod: "b".into(),
                    cpu_usage_cores: 0.25,
                    memory_working_set_bytes: 2048.0,
                    restarts: 0,
                }),
                AggregatedMetrics::Pod(PodMetrics {
                    namespace: "default".into(),
                    pod: "c".into(),
                    cpu_usage_cores: 0.0,
                    memory_working_set_bytes: 4096.0,
                    restarts: 0,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_node_memory_failure_aborts_without_partial_result() {
        let backend = StaticMetrics::new()
            .answer(
                expression(Dimension::Node, None, Field::CpuPercent),
                vec![sample(&[("instance", "node-a:9100")], 12.5)],
            )
            .fail(
                expression(Dimension::Node, None, Field::MemoryPercent),
                Error::Transport("metrics backend returned 500".into()),
            );
        let aggregator = MetricsAggregator::new(Arc::new(backend));

        let err = aggregator
            .aggregate(Dimension::Node, None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
        assert!(err.to_string().contains("node memory_percent"));
    }

    #[tokio::test]
    async fn test_unparsable_values_count_as_zero_and_unlabelled_samples_are_skipped() {
        let backend = StaticMetrics::new()
            .answer(
                expression(Dimension::Node, None, Field::CpuPercent),
                vec![
                    sample(&[("instance", "node-b:9100")], f64::NAN),
                    sample(&[("job", "node")], 99.0),
                ],
            )
            .answer(
                expression(Dimension::Node, None, Field::Load1),
                vec![sample(&[("instance", "node-a:9100")], 1.5)],
            );
        let aggregator = MetricsAggregator::new(Arc::new(backend));

        let records = aggregator
            .aggregate(Dimension::Node, None, None)
            .await
            .unwrap();

        assert_eq!(
            records,
            vec![
                AggregatedMetrics::Node(NodeMetrics {
                    instance: "node-a:9100".into(),
                    load1: 1.5,
                    ..Default::default()
                }),
                AggregatedMetrics::Node(NodeMetrics {
                    instance: "node-b:9100".into(),
                    ..Default::default()
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_cluster_is_a_single_record() {
        let backend = StaticMetrics::new()
            .answer(
                expression(Dimension::Cluster, None, Field::CpuPercent),
                vec![sample(&[], 40.0)],
            )
            .answer(
                expression(Dimension::Cluster, None, Field::NodeCount),
                vec![sample(&[], 3.0)],
            )
            .answer(
                expression(Dimension::Cluster, None, Field::PodCount),
                vec![sample(&[], 42.0)],
            );
        let aggregator = MetricsAggregator::new(Arc::new(backend));

        let records = aggregator
            .aggregate(Dimension::Cluster, None, None)
            .await
            .unwrap();

        assert_eq!(
            records,
            vec![AggregatedMetrics::Cluster(ClusterMetrics {
                cpu_usage_percent: 40.0,
                node_count: 3,
                pod_count: 42,
                ..Default::default()
            })]
        );
    }

    #[tokio::test]
    async fn test_no_data_yields_empty_list() {
        let aggregator = MetricsAggregator::new(Arc::new(StaticMetrics::new()));
        let records = aggregator
            .aggregate(Dimension::Namespace, None, None)
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_namespace_filter_is_validated_and_applied() {
        let backend = Arc::new(StaticMetrics::new());
        let aggregator = MetricsAggregator::new(backend.clone());

        let err = aggregator
            .aggregate(Dimension::Pod, Some(r#"x"}or vector(1)"#), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(backend.seen().is_empty());

        aggregator
            .aggregate(Dimension::Namespace, Some("prod"), None)
            .await
            .unwrap();
        let seen = backend.seen();
        assert_eq!(seen.len(), 3);
        assert!(seen
            .iter()
            .all(|q| q.expression.contains(r#"namespace="prod""#)));
    }

    #[tokio::test]
    async fn test_series_and_query_passthrough() {
        let backend = Arc::new(
            StaticMetrics::new().answer("node_load1", vec![sample(&[("instance", "a")], 0.7)]),
        );
        let aggregator = MetricsAggregator::new(backend.clone());

        let samples = aggregator.series("node_load1", None).await.unwrap();
        assert_eq!(samples.len(), 1);

        assert!(matches!(
            aggregator.series("up{job=\"x\"}", None).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            aggregator.query(&MetricQuery::new("  ")).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(
            aggregator
                .query(&MetricQuery::new("node_load1"))
                .await
                .unwrap()[0]
                .value,
            0.7
        );
    }

    #[tokio::test]
    async fn test_basic_reads_first_sample_of_each_query() {
        let mut up = sample(&[("__name__", "up"), ("job", "node")], 1.0);
        up.timestamp = Utc.timestamp_opt(1_700_000_000, 0).single();
        let backend = StaticMetrics::new()
            .answer(queries::UP, vec![up, sample(&[("job", "api")], 0.0)])
            .answer(queries::PROCESS_CPU, vec![sample(&[], 0.125)])
            .answer(queries::PROCESS_MEMORY, vec![sample(&[], f64::NAN)]);
        let aggregator = MetricsAggregator::new(Arc::new(backend));

        let basic = aggregator.basic().await.unwrap();
        assert!(basic.up_status);
        assert_eq!(basic.cpu_usage, 0.125);
        assert_eq!(basic.memory_usage, 0.0);
        assert_eq!(basic.timestamp.map(|t| t.timestamp()), Some(1_700_000_000));

        let json = serde_json::to_value(&basic).unwrap();
        assert_eq!(json["upStatus"], true);
        assert_eq!(json["cpuUsage"], 0.125);
    }

    #[tokio::test]
    async fn test_basic_without_data_is_down() {
        let aggregator = MetricsAggregator::new(Arc::new(StaticMetrics::new()));
        assert_eq!(aggregator.basic().await.unwrap(), BasicMetrics::default());

        let failing = StaticMetrics::new()
            .fail(queries::PROCESS_MEMORY, Error::Unavailable("refused".into()));
        let err = MetricsAggregator::new(Arc::new(failing))
            .basic()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(msg) if msg.contains("process_resident_memory_bytes")));
    }

    #[tokio::test]
    async fn test_metric_names_are_distinct_and_sorted() {
        let backend = StaticMetrics::new().answer(
            queries::ALL_SERIES,
            vec![
                sample(&[("__name__", "up"), ("job", "a")], 1.0),
                sample(&[("__name__", "node_load1")], 0.3),
                sample(&[("__name__", "up"), ("job", "b")], 1.0),
                sample(&[("job", "unnamed")], 1.0),
            ],
        );
        let names = MetricsAggregator::new(Arc::new(backend))
            .metric_names()
            .await
            .unwrap();
        assert_eq!(names, vec!["node_load1".to_string(), "up".to_string()]);
    }

    #[test]
    fn test_dimension_parsing() {
        assert_eq!("nodes".parse::<Dimension>().unwrap(), Dimension::Node);
        assert_eq!("Pods".parse::<Dimension>().unwrap(), Dimension::Pod);
        assert_eq!("namespace".parse::<Dimension>().unwrap(), Dimension::Namespace);
        assert!("deployments".parse::<Dimension>().is_err());
    }

    #[test]
    fn test_records_serialize_with_dimension_tag() {
        let record = AggregatedMetrics::Pod(PodMetrics {
            namespace: "default".into(),
            pod: "a".into(),
            ..Default::default()
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["dimension"], "pod");
        assert_eq!(json["cpuUsageCores"], 0.0);
    }
}
