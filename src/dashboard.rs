//! ダッシュボード用の読み取り専用ビュー
//!
//! パネルはメトリクス名とラベルで対象を選び、パネルのラベルを全て含む
//! 系列をまとめて要約する。書き込みは一切行わない。

use crate::alerts::{AlertEngine, AlertStats};
use crate::clock::saturating_sub;
use crate::collector::{MetricsCollector, PerformanceMetrics};
use crate::config::{duration_ms, DashboardsConfig};
use crate::error::{Error, Result};
use crate::metrics::{
    aggregate, validate_metric_name, AggregationType, DataPoint, Labels, MetricQuery,
};
use crate::storage::StoreStatistics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// ダッシュボードのパネル
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardPanel {
    pub id: String,
    pub title: String,
    pub metric: String,
    #[serde(default)]
    pub labels: Labels,
    /// 表示値の集計関数（未指定なら最新値）
    #[serde(default)]
    pub aggregation: Option<AggregationType>,
    /// 要約対象の期間（ms）
    #[serde(with = "duration_ms")]
    pub window: Duration,
}

impl DashboardPanel {
    pub fn new(id: impl Into<String>, title: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            metric: metric.into(),
            labels: Labels::new(),
            aggregation: None,
            window: Duration::from_secs(60 * 60),
        }
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationType) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// メトリクス要約
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    /// 95パーセンタイル
    pub p95: f64,
    pub count: usize,
}

impl MetricSummary {
    pub fn from_points(points: &[DataPoint]) -> Self {
        Self {
            avg: aggregate(points, AggregationType::Average),
            min: aggregate(points, AggregationType::Min),
            max: aggregate(points, AggregationType::Max),
            p95: aggregate(points, AggregationType::P95),
            count: points.len(),
        }
    }
}

/// パネル1枚分の表示データ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelData {
    pub panel: DashboardPanel,
    pub value: f64,
    pub summary: MetricSummary,
    /// 要約に含まれた系列数
    pub series: usize,
}

/// ダッシュボード全体のスナップショット
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub panels: Vec<PanelData>,
    pub statistics: StoreStatistics,
    pub performance: PerformanceMetrics,
    pub alerts: AlertStats,
}

/// ダッシュボードマネージャー
pub struct DashboardManager {
    config: DashboardsConfig,
    collector: MetricsCollector,
    alerts: AlertEngine,
    panels: Arc<RwLock<Vec<DashboardPanel>>>,
}

impl DashboardManager {
    /// 新しいマネージャーを作成
    pub fn new(collector: MetricsCollector, alerts: AlertEngine) -> Self {
        Self {
            config: collector.config().dashboards.clone(),
            collector,
            alerts,
            panels: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// 推奨される再取得間隔
    pub fn refresh_interval(&self) -> Duration {
        self.config.refresh_interval
    }

    /// パネルを追加（同じIDは置き換え）
    pub async fn add_panel(&self, panel: DashboardPanel) -> Result<()> {
        validate_metric_name(&panel.metric)?;
        if panel.window.is_zero() {
            return Err(Error::Config(format!(
                "panel {} window must be positive",
                panel.id
            )));
        }

        let mut panels = self.panels.write().await;
        match panels.iter_mut().find(|existing| existing.id == panel.id) {
            Some(existing) => *existing = panel,
            None => panels.push(panel),
        }
        Ok(())
    }

    pub async fn remove_panel(&self, id: &str) -> bool {
        let mut panels = self.panels.write().await;
        let before = panels.len();
        panels.retain(|panel| panel.id != id);
        panels.len() != before
    }

    pub async fn panels(&self) -> Vec<DashboardPanel> {
        self.panels.read().await.clone()
    }

    /// スナップショットを生成
    pub async fn snapshot(&self) -> Result<DashboardSnapshot> {
        if !self.config.enabled {
            return Err(Error::Config("dashboards are disabled".to_string()));
        }

        let generated_at = self.collector.clock().now();
        let panels = self.panels().await;
        let mut data = Vec::with_capacity(panels.len());
        for panel in panels {
            data.push(self.panel_data(panel, generated_at).await?);
        }

        debug!("Built dashboard snapshot with {} panels", data.len());
        Ok(DashboardSnapshot {
            generated_at,
            panels: data,
            statistics: self.collector.statistics().await,
            performance: self.collector.get_performance_metrics().await,
            alerts: self.alerts.get_stats().await,
        })
    }

    async fn panel_data(&self, panel: DashboardPanel, now: DateTime<Utc>) -> Result<PanelData> {
        let query = MetricQuery::for_metric(panel.metric.clone())
            .with_labels(panel.labels.clone())
            .with_range(Some(saturating_sub(now, panel.window)), Some(now));
        let result = self.collector.query(&query).await?;

        let mut points: Vec<DataPoint> = result
            .time_series
            .iter()
            .flat_map(|series| series.data_points.iter().cloned())
            .collect();
        points.sort_by_key(|point| point.timestamp);

        let value = match panel.aggregation {
            Some(aggregation) => aggregate(&points, aggregation),
            None => points.last().map_or(0.0, |point| point.value),
        };

        Ok(PanelData {
            summary: MetricSummary::from_points(&points),
            series: result.time_series.len(),
            value,
            panel,
        })
    }
}
