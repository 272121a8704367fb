//! メトリクス・アラートエンジンの統合テスト

use std::sync::Arc;
use std::time::Duration;
use testweb_metrics::alerts::AlertRuleStatus;
use testweb_metrics::collector::{SystemSample, SystemSampler};
use testweb_metrics::dashboard::DashboardPanel;
use testweb_metrics::storage::StoreConfig;
use testweb_metrics::{
    labels, AggregationType, AlertCondition, AlertEngine, AlertSeverity, Clock, Comparison,
    DashboardManager, DataPoint, Labels, ManualClock, MetricQuery, MetricRegistry,
    MetricsCollector, MetricsConfig, NewAlertRule, TimeSeriesStore,
};

struct StaticSampler;

impl SystemSampler for StaticSampler {
    fn sample(&self) -> Vec<SystemSample> {
        vec![SystemSample::new("system.memory.used_percent", 42.0)]
    }
}

async fn collector(clock: &ManualClock) -> MetricsCollector {
    MetricsCollector::builder(MetricsConfig::default())
        .clock(Arc::new(clock.clone()))
        .sampler(Arc::new(StaticSampler))
        .start_cleanup(false)
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_metric_name_validation() {
    let clock = ManualClock::default();
    let collector = collector(&clock).await;
    let none = Labels::new();

    for name in ["x", "service.response_time", "a1.b_2.c3", "engine.k6.vus"] {
        assert!(collector.record(name, 1.0, &none).await.is_ok(), "{}", name);
    }
    for name in ["", "1abc", "Service.time", "a..b", "a.", ".a", "a-b", "a.1b", "a b"] {
        assert!(collector.record(name, 1.0, &none).await.is_err(), "{}", name);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_not_lost() {
    let clock = ManualClock::default();
    let collector = collector(&clock).await;
    let l = labels([("engine", "k6")]);

    let tasks: Vec<_> = (0..150)
        .map(|_| {
            let collector = collector.clone();
            let l = l.clone();
            tokio::spawn(async move { collector.increment("test.execution_count", 1.0, &l).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(
        collector.get_current_value("test.execution_count", &l).await,
        150.0
    );
}

#[tokio::test]
async fn test_aggregations_over_fixed_series() {
    let clock = ManualClock::default();
    let collector = collector(&clock).await;
    let none = Labels::new();
    for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
        collector.histogram("queue.depth", v, &none).await.unwrap();
    }

    let expected = [
        (AggregationType::Sum, 15.0),
        (AggregationType::Average, 3.0),
        (AggregationType::Min, 1.0),
        (AggregationType::Max, 5.0),
        (AggregationType::Count, 5.0),
        (AggregationType::Median, 3.0),
    ];
    for (aggregation, value) in expected {
        assert_eq!(
            collector
                .get_aggregated_value("queue.depth", aggregation, None, &none)
                .await,
            value,
            "{}",
            aggregation
        );
    }
    let p95 = collector
        .get_aggregated_value("queue.depth", AggregationType::P95, None, &none)
        .await;
    assert!((p95 - 4.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_empty_series_aggregates_to_zero() {
    let clock = ManualClock::default();
    let collector = collector(&clock).await;

    for aggregation in [AggregationType::Sum, AggregationType::P99, AggregationType::Rate] {
        assert_eq!(
            collector
                .get_aggregated_value("never.recorded", aggregation, None, &Labels::new())
                .await,
            0.0
        );
    }
    assert_eq!(collector.statistics().await.data_points, 0);
}

#[tokio::test]
async fn test_retention_cleanup_removes_expired_series() {
    let clock = ManualClock::default();
    let config = MetricsConfig::default();
    let store = TimeSeriesStore::new(
        StoreConfig::from(&config),
        Arc::new(MetricRegistry::with_defaults()),
        Arc::new(clock.clone()),
    );

    let stale = clock.now() - chrono::Duration::hours(25);
    store
        .store(DataPoint::new(stale, 3.0), "queue.depth", &Labels::new())
        .await
        .unwrap();
    assert_eq!(store.get_statistics().await.total_metrics, 1);

    let report = store.cleanup().await;
    assert_eq!(report.removed_points, 1);

    let result = store
        .query(&MetricQuery::for_metric("queue.depth"))
        .await
        .unwrap();
    assert_eq!(result.point_count(), 0);
    assert_eq!(store.get_statistics().await.total_metrics, 0);
}

#[tokio::test]
async fn test_label_order_does_not_split_series() {
    let clock = ManualClock::default();
    let collector = collector(&clock).await;

    collector
        .record("x", 1.0, &labels([("a", "1"), ("b", "2")]))
        .await
        .unwrap();
    collector
        .record("x", 1.0, &labels([("b", "2"), ("a", "1")]))
        .await
        .unwrap();
    collector.record("x", 1.0, &labels([("a", "1")])).await.unwrap();

    let result = collector.query(&MetricQuery::for_metric("x")).await.unwrap();
    assert_eq!(result.total_count, 2);
    let sizes: Vec<usize> = result
        .time_series
        .iter()
        .map(|series| series.data_points.len())
        .collect();
    assert!(sizes.contains(&2) && sizes.contains(&1));
}

#[tokio::test]
async fn test_error_rate_alert_end_to_end() {
    let clock = ManualClock::default();
    let collector = collector(&clock).await;
    let engine = AlertEngine::new(collector.clone());
    let none = Labels::new();

    let rule = engine
        .create_alert_rule(
            NewAlertRule::new(
                "Error rate above 5%",
                "error.rate",
                AlertCondition::new(Comparison::GreaterThan, 5.0),
                AlertSeverity::Warning,
            )
            .with_cooldown(Duration::from_millis(60_000)),
        )
        .await
        .unwrap();

    collector.percentage("error.rate", 2.0, &none).await.unwrap();
    collector.percentage("error.rate", 8.0, &none).await.unwrap();
    let events = engine.evaluate_once().await;
    assert_eq!(events.len(), 1);
    assert_eq!((events[0].value, events[0].threshold), (8.0, 5.0));
    assert_eq!(events[0].severity, AlertSeverity::Warning);
    assert_eq!(
        engine.get_rule_status(&rule.id).await,
        Some(AlertRuleStatus::Cooldown)
    );

    clock.advance(Duration::from_secs(30));
    collector.percentage("error.rate", 9.0, &none).await.unwrap();
    assert!(engine.evaluate_once().await.is_empty());

    clock.advance(Duration::from_secs(31));
    collector.percentage("error.rate", 9.0, &none).await.unwrap();
    assert_eq!(engine.evaluate_once().await.len(), 1);

    let history = engine.get_alert_history(None).await;
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp > history[1].timestamp);
}

#[tokio::test]
async fn test_dashboard_over_sampled_system_metrics() {
    let clock = ManualClock::default();
    let collector = collector(&clock).await;
    let engine = AlertEngine::new(collector.clone());
    engine.add_default_rules().await.unwrap();

    collector.sample_system_metrics().await.unwrap();
    clock.advance(Duration::from_secs(30));
    collector.sample_system_metrics().await.unwrap();

    let dashboard = DashboardManager::new(collector.clone(), engine.clone());
    dashboard
        .add_panel(
            DashboardPanel::new("mem", "Memory", "system.memory.used_percent")
                .with_aggregation(AggregationType::Average)
                .with_window(Duration::from_secs(300)),
        )
        .await
        .unwrap();

    let snapshot = dashboard.snapshot().await.unwrap();
    assert_eq!(snapshot.panels[0].value, 42.0);
    assert_eq!(snapshot.panels[0].summary.count, 2);
    assert_eq!(snapshot.alerts.total_rules, 8);

    assert!(engine.evaluate_once().await.is_empty());
    collector.destroy().await;
}
