//! Metrics Types Module
//!
//! メトリクス定義・データポイント・クエリの型定義

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod aggregation;
pub mod registry;

pub use aggregation::{aggregate, percentile, rollup, AggregationType, RollupBucket};
pub use registry::{validate_metric_name, MetricRegistry};

/// ラベル集合
///
/// キー順に整列されるため、挿入順は系列の同一性に影響しない。
pub type Labels = BTreeMap<String, String>;

/// `(key, value)` の組からラベル集合を作成
pub fn labels<K, V, I>(pairs: I) -> Labels
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// メトリクスの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// 単調増加カウンター
    Counter,
    /// 任意に上下する瞬間値
    Gauge,
    /// 分布
    Histogram,
    /// 所要時間（ms）
    Timer,
    /// 単位時間あたりの量
    Rate,
    /// 0〜100 の割合
    Percentage,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Timer => "timer",
            Self::Rate => "rate",
            Self::Percentage => "percentage",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// メトリクスのカテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    Performance,
    Usage,
    Error,
    Business,
    System,
    Quality,
}

impl MetricCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Usage => "usage",
            Self::Error => "error",
            Self::Business => "business",
            Self::System => "system",
            Self::Quality => "quality",
        }
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// メトリクス定義
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// ドット区切りの名前（例: `service.response_time`）
    pub name: String,
    /// 種類
    pub metric_type: MetricType,
    /// カテゴリ
    pub category: MetricCategory,
    /// 単位
    pub unit: String,
    /// 説明
    #[serde(default)]
    pub description: String,
    /// 既定の集計関数
    #[serde(default)]
    pub default_aggregations: Vec<AggregationType>,
    /// 警告閾値
    #[serde(default)]
    pub warning_threshold: Option<f64>,
    /// 致命的閾値
    #[serde(default)]
    pub critical_threshold: Option<f64>,
}

impl MetricDefinition {
    /// 新しい定義を作成
    pub fn new(
        name: impl Into<String>,
        metric_type: MetricType,
        category: MetricCategory,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            metric_type,
            category,
            unit: unit.into(),
            description: String::new(),
            default_aggregations: Vec::new(),
            warning_threshold: None,
            critical_threshold: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_aggregations(mut self, aggregations: Vec<AggregationType>) -> Self {
        self.default_aggregations = aggregations;
        self
    }

    /// 警告・致命的閾値を設定
    pub fn with_thresholds(mut self, warning: Option<f64>, critical: Option<f64>) -> Self {
        self.warning_threshold = warning;
        self.critical_threshold = critical;
        self
    }

    /// いずれかの閾値を持つか
    pub fn has_thresholds(&self) -> bool {
        self.warning_threshold.is_some() || self.critical_threshold.is_some()
    }
}

/// データポイント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// タイムスタンプ（ms 精度）
    pub timestamp: DateTime<Utc>,
    /// 値
    pub value: f64,
    /// ラベル
    #[serde(default)]
    pub labels: Labels,
}

impl DataPoint {
    /// 新しいデータポイントを作成
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value,
            labels: Labels::new(),
        }
    }

    /// ラベルを設定
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }
}

/// 系列の識別子（メトリクス名 + 正規化済みラベル集合）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub name: String,
    pub labels: Labels,
}

impl SeriesKey {
    pub fn new(name: impl Into<String>, labels: &Labels) -> Self {
        Self {
            name: name.into(),
            labels: labels.clone(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.labels.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}

/// メトリクスクエリ
///
/// 全フィルターは省略可能。状態を変更しない。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricQuery {
    /// メトリクス名（完全一致）
    pub name: Option<String>,
    pub category: Option<MetricCategory>,
    pub metric_type: Option<MetricType>,
    /// ラベル部分一致（指定したキーと値を全て含む系列）
    pub labels: Option<Labels>,
    /// 開始時刻（含む）
    pub start_time: Option<DateTime<Utc>>,
    /// 終了時刻（含む）
    pub end_time: Option<DateTime<Utc>>,
    /// 計算する集計関数
    pub aggregations: Vec<AggregationType>,
    /// 返す系列数の上限
    pub limit: Option<usize>,
}

impl MetricQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// 名前で絞り込むクエリ
    pub fn for_metric(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: MetricCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = Some(metric_type);
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = Some(labels);
        self
    }

    /// 時間範囲を設定
    pub fn with_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn with_aggregations(mut self, aggregations: Vec<AggregationType>) -> Self {
        self.aggregations = aggregations;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// クエリの妥当性を検証
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(Error::InvalidQuery(format!(
                    "start_time {} is after end_time {}",
                    start, end
                )));
            }
        }
        if self.limit == Some(0) {
            return Err(Error::InvalidQuery("limit must be positive".to_string()));
        }
        if let Some(name) = &self.name {
            validate_metric_name(name)?;
        }
        Ok(())
    }

    /// ラベルが部分一致するか
    pub fn matches_labels(&self, series_labels: &Labels) -> bool {
        match &self.labels {
            Some(wanted) => wanted
                .iter()
                .all(|(k, v)| series_labels.get(k).is_some_and(|actual| actual == v)),
            None => true,
        }
    }

    /// データポイントが時間範囲に含まれるか
    pub fn matches_time(&self, timestamp: DateTime<Utc>) -> bool {
        self.start_time.map_or(true, |start| timestamp >= start)
            && self.end_time.map_or(true, |end| timestamp <= end)
    }
}

/// クエリ結果の1系列
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesData {
    pub name: String,
    pub labels: Labels,
    pub metric_type: MetricType,
    pub category: MetricCategory,
    pub unit: String,
    /// フィルター後のデータポイント（追加順）
    pub data_points: Vec<DataPoint>,
    /// フィルター後のポイントに対する集計値
    pub aggregations: BTreeMap<AggregationType, f64>,
}

/// クエリ結果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricQueryResult {
    pub time_series: Vec<TimeSeriesData>,
    /// 上限適用前の一致系列数
    pub total_count: usize,
    /// 上限で切り詰められたか
    pub has_more: bool,
}

impl MetricQueryResult {
    /// 全系列のデータポイント数
    pub fn point_count(&self) -> usize {
        self.time_series.iter().map(|s| s.data_points.len()).sum()
    }
}
