//! メトリクス定義レジストリ
//!
//! 名前 → 定義の静的カタログ。未登録の名前は名前から推測した既定値で分類する。

use super::aggregation::AggregationType;
use super::{MetricCategory, MetricDefinition, MetricType};
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tokio::sync::RwLock;
use tracing::debug;

static METRIC_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)*$").expect("metric name pattern is valid")
});

/// メトリクス名を検証
pub fn validate_metric_name(name: &str) -> Result<()> {
    if METRIC_NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidMetricName(name.to_string()))
    }
}

/// メトリクス定義レジストリ
pub struct MetricRegistry {
    definitions: RwLock<HashMap<String, MetricDefinition>>,
}

impl MetricRegistry {
    /// 空のレジストリを作成
    pub fn empty() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
        }
    }

    /// 定義済みカタログで初期化したレジストリを作成
    pub fn with_defaults() -> Self {
        let definitions = predefined_metrics()
            .into_iter()
            .map(|def| (def.name.clone(), def))
            .collect();
        Self {
            definitions: RwLock::new(definitions),
        }
    }

    /// 定義を登録（同名は上書き）
    pub async fn register(&self, definition: MetricDefinition) -> Result<()> {
        validate_metric_name(&definition.name)?;
        debug!(
            "Registering metric definition: {} ({})",
            definition.name, definition.metric_type
        );
        let mut definitions = self.definitions.write().await;
        definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// 登録済み定義を取得
    pub async fn get(&self, name: &str) -> Option<MetricDefinition> {
        let definitions = self.definitions.read().await;
        definitions.get(name).cloned()
    }

    /// 登録済みか、未登録なら推測した既定定義を返す
    pub async fn resolve(&self, name: &str) -> MetricDefinition {
        match self.get(name).await {
            Some(def) => def,
            None => classify(name),
        }
    }

    /// 全定義（名前順）
    pub async fn list(&self) -> Vec<MetricDefinition> {
        let definitions = self.definitions.read().await;
        let mut all: Vec<MetricDefinition> = definitions.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn len(&self) -> usize {
        self.definitions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.definitions.read().await.is_empty()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// 未登録メトリクスを名前から分類
pub fn classify(name: &str) -> MetricDefinition {
    let leaf = name.rsplit('.').next().unwrap_or(name);

    let (metric_type, unit) = if leaf.ends_with("count") || leaf.ends_with("total") {
        (MetricType::Counter, "count")
    } else if leaf.contains("time") || leaf.contains("duration") || leaf.contains("latency") {
        (MetricType::Timer, "ms")
    } else if leaf.contains("percent") || leaf.contains("usage") || leaf.ends_with("ratio") {
        (MetricType::Percentage, "%")
    } else if leaf.contains("rate") || leaf.contains("throughput") {
        (MetricType::Rate, "/s")
    } else {
        (MetricType::Gauge, "")
    };

    let category = if name.starts_with("system.") || name.starts_with("process.") {
        MetricCategory::System
    } else if name.contains("error") || name.contains("fail") {
        MetricCategory::Error
    } else if matches!(metric_type, MetricType::Timer | MetricType::Rate) {
        MetricCategory::Performance
    } else if name.starts_with("business.") {
        MetricCategory::Business
    } else {
        MetricCategory::Usage
    };

    let default_aggregations = match metric_type {
        MetricType::Counter => vec![AggregationType::Sum, AggregationType::Rate],
        MetricType::Timer | MetricType::Histogram => vec![
            AggregationType::Average,
            AggregationType::P95,
            AggregationType::P99,
        ],
        _ => vec![
            AggregationType::Average,
            AggregationType::Min,
            AggregationType::Max,
        ],
    };

    MetricDefinition::new(name, metric_type, category, unit).with_aggregations(default_aggregations)
}

/// 定義済みメトリクスのカタログ
fn predefined_metrics() -> Vec<MetricDefinition> {
    use AggregationType::*;
    use MetricCategory as C;
    use MetricType as T;

    vec![
        MetricDefinition::new("service.response_time", T::Timer, C::Performance, "ms")
            .with_description("Service call response time")
            .with_aggregations(vec![Average, Median, P95, P99])
            .with_thresholds(Some(1000.0), Some(3000.0)),
        MetricDefinition::new("service.request_count", T::Counter, C::Usage, "count")
            .with_description("Total service requests")
            .with_aggregations(vec![Sum, Rate]),
        MetricDefinition::new("service.throughput", T::Rate, C::Performance, "req/s")
            .with_aggregations(vec![Average, Max]),
        MetricDefinition::new("error.count", T::Counter, C::Error, "count")
            .with_description("Total errors")
            .with_aggregations(vec![Sum, Rate]),
        MetricDefinition::new("error.rate", T::Percentage, C::Error, "%")
            .with_description("Failed requests ratio")
            .with_aggregations(vec![Average, Max])
            .with_thresholds(Some(5.0), Some(10.0)),
        MetricDefinition::new("test.execution_count", T::Counter, C::Business, "count")
            .with_description("Executed test runs")
            .with_aggregations(vec![Sum, Rate]),
        MetricDefinition::new("test.duration", T::Timer, C::Performance, "ms")
            .with_aggregations(vec![Average, P95, Max]),
        MetricDefinition::new("test.success_rate", T::Percentage, C::Quality, "%")
            .with_description("Passed test runs ratio")
            .with_aggregations(vec![Average, Min]),
        MetricDefinition::new("engine.throughput", T::Rate, C::Performance, "req/s")
            .with_description("Per-engine request throughput")
            .with_aggregations(vec![Average, Max, Rate]),
        MetricDefinition::new("engine.active_runs", T::Gauge, C::Usage, "count")
            .with_aggregations(vec![Average, Max]),
        MetricDefinition::new("system.memory.used_percent", T::Percentage, C::System, "%")
            .with_aggregations(vec![Average, Max])
            .with_thresholds(Some(85.0), Some(95.0)),
        MetricDefinition::new("system.memory.used", T::Gauge, C::System, "bytes")
            .with_aggregations(vec![Average, Max]),
        MetricDefinition::new("system.memory.total", T::Gauge, C::System, "bytes"),
        MetricDefinition::new("system.process.resident_memory", T::Gauge, C::System, "bytes")
            .with_aggregations(vec![Average, Max]),
        MetricDefinition::new("system.process.virtual_memory", T::Gauge, C::System, "bytes"),
        MetricDefinition::new("system.process.cpu_usage", T::Percentage, C::System, "%")
            .with_aggregations(vec![Average, Max])
            .with_thresholds(Some(80.0), Some(95.0)),
    ]
}
