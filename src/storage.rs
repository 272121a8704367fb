//! Time-Series Store
//!
//! (メトリクス名 + ラベル集合) ごとに、件数と経過時間で上限を設けた
//! データポイント列を保持するインメモリストア。
//!
//! ロック規律:
//! - 系列マップは `RwLock`。書き込み・読み取りは read ガードを保持したまま
//!   系列ごとの `Mutex` を取得する。
//! - 系列の削除（クリーンアップ・delete）は write ガードの下でのみ行う。
//!   そのため削除途中の系列に書き込んで更新が失われることはない。
//!
//! 書き込みは名前を検証してから受け付け、カウンター系列の値は
//! `reset` 以外で減少しない。タイムスタンプは ms 精度に切り捨てる。

use crate::clock::{saturating_sub, Clock};
use crate::config::MetricsConfig;
use crate::error::{Error, Result};
use crate::metrics::aggregation::{aggregate, aggregate_all, rollup};
use crate::metrics::{
    validate_metric_name, AggregationType, DataPoint, Labels, MetricCategory, MetricDefinition, MetricQuery,
    MetricQueryResult, MetricRegistry, MetricType, RollupBucket, SeriesKey, TimeSeriesData,
};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// ストア設定
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// 系列ごとの最大データポイント数
    pub max_points_per_series: usize,
    /// データポイントの最大保持期間
    pub max_age: Duration,
    /// ロールアップで遡れる最大期間
    pub max_rollup_window: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from(&MetricsConfig::default())
    }
}

impl From<&MetricsConfig> for StoreConfig {
    fn from(config: &MetricsConfig) -> Self {
        Self {
            max_points_per_series: config.storage.max_points_per_series,
            max_age: config.retention.raw,
            max_rollup_window: config.retention.aggregated,
        }
    }
}

/// ストア統計のスナップショット
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStatistics {
    /// データを持つ系列数
    pub total_metrics: usize,
    pub metrics_by_type: BTreeMap<MetricType, usize>,
    pub metrics_by_category: BTreeMap<MetricCategory, usize>,
    /// 全系列のデータポイント数
    pub data_points: usize,
    /// 推定メモリ使用量（bytes, 概算）
    pub storage_size: usize,
}

/// クリーンアップ結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed_points: usize,
    pub removed_series: usize,
}

/// 1系列のリングバッファ
struct TimeSeries {
    key: SeriesKey,
    points: VecDeque<DataPoint>,
}

impl TimeSeries {
    fn new(key: SeriesKey) -> Self {
        Self {
            key,
            points: VecDeque::new(),
        }
    }

    fn append(&mut self, point: DataPoint, config: &StoreConfig) -> Result<()> {
        self.points
            .try_reserve(1)
            .map_err(|e| Error::Storage(format!("cannot grow series {}: {}", self.key, e)))?;
        self.points.push_back(point);

        while self.points.len() > config.max_points_per_series {
            self.points.pop_front();
        }

        // 経過時間による追い出しは系列内の最新ポイント基準
        if let Some(newest) = self.points.back().map(|p| p.timestamp) {
            let cutoff = saturating_sub(newest, config.max_age);
            while self
                .points
                .front()
                .is_some_and(|oldest| oldest.timestamp < cutoff)
            {
                self.points.pop_front();
            }
        }
        Ok(())
    }

    /// カウンターの値が直前の値を下回らないことを確認
    fn ensure_not_below_latest(&self, value: f64) -> Result<()> {
        match self.points.back() {
            Some(latest) if value < latest.value => Err(Error::InvalidValue(format!(
                "counter {} cannot decrease from {} to {}",
                self.key, latest.value, value
            ))),
            _ => Ok(()),
        }
    }

    fn latest_value(&self) -> f64 {
        self.points.back().map_or(0.0, |p| p.value)
    }

    fn points_since(&self, start: Option<DateTime<Utc>>) -> Vec<DataPoint> {
        self.points
            .iter()
            .filter(|p| start.map_or(true, |s| p.timestamp >= s))
            .cloned()
            .collect()
    }

    fn estimated_size(&self) -> usize {
        let key_size = self.key.name.len()
            + self
                .key
                .labels
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>();
        let label_size: usize = self
            .points
            .iter()
            .map(|p| p.labels.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>())
            .sum();
        std::mem::size_of::<Self>()
            + key_size
            + self.points.len() * std::mem::size_of::<DataPoint>()
            + label_size
    }
}

type SeriesMap = HashMap<SeriesKey, Arc<Mutex<TimeSeries>>>;

/// 時系列ストア
#[derive(Clone)]
pub struct TimeSeriesStore {
    config: StoreConfig,
    registry: Arc<MetricRegistry>,
    clock: Arc<dyn Clock>,
    series: Arc<RwLock<SeriesMap>>,
    cleanup_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TimeSeriesStore {
    /// 新しいストアを作成
    pub fn new(config: StoreConfig, registry: Arc<MetricRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            registry,
            clock,
            series: Arc::new(RwLock::new(HashMap::new())),
            cleanup_task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// 系列のクリティカルセクション内で `f` を実行する（系列は必要なら作成）
    async fn with_series<T>(
        &self,
        name: &str,
        labels: &Labels,
        f: impl FnOnce(&mut TimeSeries, &StoreConfig) -> Result<T>,
    ) -> Result<T> {
        let key = SeriesKey::new(name, labels);

        {
            let map = self.series.read().await;
            if let Some(series) = map.get(&key) {
                let mut series = series.lock().await;
                return f(&mut *series, &self.config);
            }
        }

        let mut map = self.series.write().await;
        let series = map
            .entry(key.clone())
            .or_insert_with(|| {
                debug!("Creating series {}", key);
                Arc::new(Mutex::new(TimeSeries::new(key)))
            })
            .clone();
        let _map = map.downgrade();
        let mut series = series.lock().await;
        f(&mut *series, &self.config)
    }

    /// 名前を検証し、カウンター型のメトリクスかを返す
    async fn check_write(&self, name: &str) -> Result<bool> {
        validate_metric_name(name)?;
        Ok(self.registry.resolve(name).await.metric_type == MetricType::Counter)
    }

    /// データポイントを指定系列に追加する
    ///
    /// ポイントのタイムスタンプは ms に切り捨てて使い、並べ替えは行わない。
    pub async fn store(&self, point: DataPoint, name: &str, labels: &Labels) -> Result<()> {
        let counter = self.check_write(name).await?;
        let mut point = point.with_labels(labels.clone());
        point.timestamp = point.timestamp.trunc_subsecs(3);
        self.with_series(name, labels, |series, config| {
            if counter {
                series.ensure_not_below_latest(point.value)?;
            }
            series.append(point, config)
        })
        .await
    }

    /// 現在時刻で値を記録する
    ///
    /// 時刻は系列のクリティカルセクション内で採取するため、
    /// 系列内の追加順とタイムスタンプ順が一致する。
    /// カウンター系列では最新値より小さい値を `InvalidValue` で拒否する。
    pub async fn record_value(&self, name: &str, labels: &Labels, value: f64) -> Result<DataPoint> {
        let counter = self.check_write(name).await?;
        let clock = self.clock.clone();
        self.with_series(name, labels, |series, config| {
            if counter {
                series.ensure_not_below_latest(value)?;
            }
            let point = DataPoint::new(stamp(clock.as_ref()), value).with_labels(labels.clone());
            series.append(point.clone(), config)?;
            Ok(point)
        })
        .await
    }

    /// 最新値に `delta` を加えた値を追記し、新しい値を返す（アトミック）
    pub async fn increment(&self, name: &str, labels: &Labels, delta: f64) -> Result<f64> {
        let counter = self.check_write(name).await?;
        if counter && delta < 0.0 {
            return Err(Error::InvalidValue(format!(
                "counter {} cannot be decremented (delta: {})",
                name, delta
            )));
        }
        let clock = self.clock.clone();
        self.with_series(name, labels, |series, config| {
            let next = series.latest_value() + delta;
            let point = DataPoint::new(stamp(clock.as_ref()), next).with_labels(labels.clone());
            series.append(point, config)?;
            Ok(next)
        })
        .await
    }

    /// 系列に 0 を追記する（カウンターが減少してよい唯一の経路）
    pub async fn reset(&self, name: &str, labels: &Labels) -> Result<DataPoint> {
        validate_metric_name(name)?;
        let clock = self.clock.clone();
        self.with_series(name, labels, |series, config| {
            let point = DataPoint::new(stamp(clock.as_ref()), 0.0).with_labels(labels.clone());
            series.append(point.clone(), config)?;
            Ok(point)
        })
        .await
    }

    /// 系列の最新データポイント
    pub async fn latest(&self, name: &str, labels: &Labels) -> Option<DataPoint> {
        let key = SeriesKey::new(name, labels);
        let map = self.series.read().await;
        let series = map.get(&key)?.lock().await;
        series.points.back().cloned()
    }

    /// クエリに一致する系列とデータポイントを返す
    pub async fn query(&self, query: &MetricQuery) -> Result<MetricQueryResult> {
        query.validate()?;

        let map = self.series.read().await;
        let mut keys: Vec<&SeriesKey> = map
            .keys()
            .filter(|key| query.name.as_ref().map_or(true, |n| n == &key.name))
            .filter(|key| query.matches_labels(&key.labels))
            .collect();
        keys.sort();

        let mut definitions: HashMap<String, MetricDefinition> = HashMap::new();
        let mut matched = Vec::new();

        for key in keys {
            if !definitions.contains_key(&key.name) {
                let def = self.registry.resolve(&key.name).await;
                definitions.insert(key.name.clone(), def);
            }
            let Some(def) = definitions.get(&key.name) else {
                continue;
            };
            if query.category.is_some_and(|c| c != def.category)
                || query.metric_type.is_some_and(|t| t != def.metric_type)
            {
                continue;
            }

            let Some(series) = map.get(key) else {
                continue;
            };
            let data_points: Vec<DataPoint> = {
                let series = series.lock().await;
                series
                    .points
                    .iter()
                    .filter(|p| query.matches_time(p.timestamp))
                    .cloned()
                    .collect()
            };
            if data_points.is_empty() {
                continue;
            }

            matched.push(TimeSeriesData {
                name: key.name.clone(),
                labels: key.labels.clone(),
                metric_type: def.metric_type,
                category: def.category,
                unit: def.unit.clone(),
                aggregations: aggregate_all(&data_points, &query.aggregations),
                data_points,
            });
        }

        let total_count = matched.len();
        let has_more = query.limit.is_some_and(|limit| total_count > limit);
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        Ok(MetricQueryResult {
            time_series: matched,
            total_count,
            has_more,
        })
    }

    /// クエリに一致するデータポイントを削除し、削除件数を返す
    pub async fn delete(&self, query: &MetricQuery) -> Result<usize> {
        query.validate()?;

        let mut map = self.series.write().await;
        let mut removed = 0;
        let mut emptied = Vec::new();

        for (key, series) in map.iter() {
            if query.name.as_ref().is_some_and(|n| n != &key.name) || !query.matches_labels(&key.labels)
            {
                continue;
            }
            if query.category.is_some() || query.metric_type.is_some() {
                let def = self.registry.resolve(&key.name).await;
                if query.category.is_some_and(|c| c != def.category)
                    || query.metric_type.is_some_and(|t| t != def.metric_type)
                {
                    continue;
                }
            }

            let mut series = series.lock().await;
            let before = series.points.len();
            series.points.retain(|p| !query.matches_time(p.timestamp));
            removed += before - series.points.len();
            if series.points.is_empty() {
                emptied.push(key.clone());
            }
        }

        for key in &emptied {
            map.remove(key);
        }

        debug!(
            "Deleted {} data points ({} series removed)",
            removed,
            emptied.len()
        );
        Ok(removed)
    }

    /// 単一系列の集計値（データが無ければ 0）
    ///
    /// `time_window` を指定した場合は `now - time_window` 以降のポイントのみ対象。
    pub async fn aggregate(
        &self,
        name: &str,
        aggregation: AggregationType,
        time_window: Option<Duration>,
        labels: &Labels,
    ) -> f64 {
        let start = time_window.map(|w| saturating_sub(self.clock.now(), w));
        let key = SeriesKey::new(name, labels);

        let map = self.series.read().await;
        let Some(series) = map.get(&key) else {
            return 0.0;
        };
        let points = series.lock().await.points_since(start);
        aggregate(&points, aggregation)
    }

    /// 単一系列を一定間隔のバケットに集計する
    ///
    /// 遡る期間は `max_rollup_window` で頭打ちになる。
    pub async fn rollup(
        &self,
        name: &str,
        labels: &Labels,
        interval: Duration,
        aggregation: AggregationType,
        window: Duration,
    ) -> Result<Vec<RollupBucket>> {
        if interval.is_zero() {
            return Err(Error::InvalidQuery("rollup interval must be positive".to_string()));
        }
        let window = window.min(self.config.max_rollup_window);
        let start = saturating_sub(self.clock.now(), window);
        let key = SeriesKey::new(name, labels);

        let map = self.series.read().await;
        let Some(series) = map.get(&key) else {
            return Ok(Vec::new());
        };
        let points = series.lock().await.points_since(Some(start));
        Ok(rollup(&points, interval, aggregation))
    }

    /// 統計情報のスナップショット
    pub async fn get_statistics(&self) -> StoreStatistics {
        let map = self.series.read().await;
        let mut stats = StoreStatistics::default();
        let mut definitions: HashMap<String, MetricDefinition> = HashMap::new();

        for (key, series) in map.iter() {
            let (points, size) = {
                let series = series.lock().await;
                (series.points.len(), series.estimated_size())
            };
            if points == 0 {
                continue;
            }

            if !definitions.contains_key(&key.name) {
                let def = self.registry.resolve(&key.name).await;
                definitions.insert(key.name.clone(), def);
            }
            if let Some(def) = definitions.get(&key.name) {
                *stats.metrics_by_type.entry(def.metric_type).or_insert(0) += 1;
                *stats.metrics_by_category.entry(def.category).or_insert(0) += 1;
            }
            stats.total_metrics += 1;
            stats.data_points += points;
            stats.storage_size += size;
        }

        stats
    }

    /// 保持期間を超えたポイントと空になった系列を削除
    pub async fn cleanup(&self) -> CleanupReport {
        let cutoff = saturating_sub(self.clock.now(), self.config.max_age);
        let mut map = self.series.write().await;
        let mut report = CleanupReport::default();
        let mut emptied = Vec::new();

        for (key, series) in map.iter() {
            let mut series = series.lock().await;
            let before = series.points.len();
            series.points.retain(|p| p.timestamp >= cutoff);
            report.removed_points += before - series.points.len();
            if series.points.is_empty() {
                emptied.push(key.clone());
            }
        }

        for key in emptied {
            map.remove(&key);
            report.removed_series += 1;
        }

        if report.removed_points > 0 || report.removed_series > 0 {
            debug!(
                "Retention cleanup removed {} points, {} series",
                report.removed_points, report.removed_series
            );
        }
        report
    }

    /// 定期クリーンアップを開始（実行中なら先に停止）
    pub async fn start_cleanup_task(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("Ignoring retention cleanup task with zero interval");
            return;
        }
        let mut task = self.cleanup_task.lock().await;
        if let Some(previous) = task.take() {
            cancel(previous).await;
        }

        let store = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.cleanup().await;
            }
        });
        *task = Some(handle);
        info!("Started retention cleanup task (interval: {:?})", interval);
    }

    /// 定期クリーンアップを停止
    pub async fn stop_cleanup_task(&self) {
        let mut task = self.cleanup_task.lock().await;
        if let Some(handle) = task.take() {
            cancel(handle).await;
            info!("Stopped retention cleanup task");
        }
    }

    /// クリーンアップタスクが動作中か
    pub async fn is_cleanup_running(&self) -> bool {
        self.cleanup_task.lock().await.is_some()
    }

    /// 系列数（空の系列を含む）
    pub async fn series_count(&self) -> usize {
        self.series.read().await.len()
    }

    /// 全系列を破棄
    pub async fn clear(&self) {
        let mut map = self.series.write().await;
        map.clear();
    }
}

/// ms 精度の現在時刻
fn stamp(clock: &dyn Clock) -> DateTime<Utc> {
    clock.now().trunc_subsecs(3)
}

/// タスクを中断し、終了を待つ
async fn cancel(handle: JoinHandle<()>) {
    handle.abort();
    if let Err(e) = handle.await {
        if !e.is_cancelled() {
            warn!("Retention cleanup task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metrics::labels;

    fn store_with_clock(max_points: usize, max_age: Duration) -> (TimeSeriesStore, ManualClock) {
        let clock = ManualClock::default();
        let config = StoreConfig {
            max_points_per_series: max_points,
            max_age,
            max_rollup_window: max_age * 2,
        };
        let store = TimeSeriesStore::new(
            config,
            Arc::new(MetricRegistry::with_defaults()),
            Arc::new(clock.clone()),
        );
        (store, clock)
    }

    fn default_store() -> (TimeSeriesStore, ManualClock) {
        store_with_clock(100, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_store_and_query() {
        let (store, clock) = default_store();
        let none = Labels::new();

        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            store.record_value("service.response_time", &none, v).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }

        let result = store
            .query(
                &MetricQuery::for_metric("service.response_time").with_aggregations(vec![
                    AggregationType::Sum,
                    AggregationType::P95,
                ]),
            )
            .await
            .unwrap();

        assert_eq!(result.total_count, 1);
        let series = &result.time_series[0];
        assert_eq!(series.data_points.len(), 5);
        assert_eq!(series.metric_type, MetricType::Timer);
        assert_eq!(series.aggregations[&AggregationType::Sum], 15.0);
        assert!((series.aggregations[&AggregationType::P95] - 4.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_duplicate_timestamps_accepted() {
        let (store, clock) = default_store();
        let none = Labels::new();
        let ts = clock.now();

        store.store(DataPoint::new(ts, 1.0), "queue.depth", &none).await.unwrap();
        store.store(DataPoint::new(ts, 2.0), "queue.depth", &none).await.unwrap();

        let latest = store.latest("queue.depth", &none).await.unwrap();
        assert_eq!(latest.value, 2.0);
        assert_eq!(store.get_statistics().await.data_points, 2);
    }

    #[tokio::test]
    async fn test_label_order_does_not_change_identity() {
        let (store, _clock) = default_store();

        let mut ab = Labels::new();
        ab.insert("a".into(), "1".into());
        ab.insert("b".into(), "2".into());
        let mut ba = Labels::new();
        ba.insert("b".into(), "2".into());
        ba.insert("a".into(), "1".into());

        store.record_value("x", &ab, 1.0).await.unwrap();
        store.record_value("x", &ba, 1.0).await.unwrap();
        store.record_value("x", &labels([("a", "1")]), 1.0).await.unwrap();

        let stats = store.get_statistics().await;
        assert_eq!(stats.total_metrics, 2);
        assert_eq!(stats.data_points, 3);
    }

    #[tokio::test]
    async fn test_count_eviction() {
        let (store, clock) = store_with_clock(3, Duration::from_secs(3600));
        let none = Labels::new();

        for v in 0..5 {
            store.record_value("queue.depth", &none, v as f64).await.unwrap();
            clock.advance(Duration::from_millis(10));
        }

        let result = store.query(&MetricQuery::for_metric("queue.depth")).await.unwrap();
        let values: Vec<f64> = result.time_series[0].data_points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_age_eviction_relative_to_newest_point() {
        let (store, clock) = store_with_clock(100, Duration::from_secs(60));
        let none = Labels::new();

        store.record_value("queue.depth", &none, 1.0).await.unwrap();
        clock.advance(Duration::from_secs(61));
        store.record_value("queue.depth", &none, 2.0).await.unwrap();

        let result = store.query(&MetricQuery::for_metric("queue.depth")).await.unwrap();
        assert_eq!(result.point_count(), 1);
    }

    #[tokio::test]
    async fn test_retention_cleanup_removes_series() {
        let (store, clock) = store_with_clock(100, Duration::from_secs(3600));
        let none = Labels::new();
        let old = clock.now() - chrono::Duration::seconds(3601);

        store.store(DataPoint::new(old, 7.0), "queue.depth", &none).await.unwrap();
        assert_eq!(store.get_statistics().await.total_metrics, 1);

        let report = store.cleanup().await;
        assert_eq!(report.removed_points, 1);
        assert_eq!(report.removed_series, 1);

        let result = store.query(&MetricQuery::for_metric("queue.depth")).await.unwrap();
        assert!(result.time_series.is_empty());
        assert_eq!(store.get_statistics().await.total_metrics, 0);
        assert_eq!(store.series_count().await, 0);
    }

    #[tokio::test]
    async fn test_query_filters_and_limit() {
        let (store, clock) = default_store();
        let start = clock.now();

        for engine in ["k6", "jmeter", "locust"] {
            let l = labels([("engine", engine)]);
            store.record_value("engine.throughput", &l, 10.0).await.unwrap();
        }
        store.record_value("error.count", &Labels::new(), 1.0).await.unwrap();
        clock.advance(Duration::from_secs(10));
        store
            .record_value("engine.throughput", &labels([("engine", "k6")]), 20.0)
            .await
            .unwrap();

        let by_category = store
            .query(&MetricQuery::new().with_category(MetricCategory::Performance))
            .await
            .unwrap();
        assert_eq!(by_category.total_count, 3);

        let limited = store
            .query(&MetricQuery::for_metric("engine.throughput").with_limit(2))
            .await
            .unwrap();
        assert_eq!(limited.time_series.len(), 2);
        assert_eq!(limited.total_count, 3);
        assert!(limited.has_more);

        let recent = store
            .query(
                &MetricQuery::for_metric("engine.throughput")
                    .with_range(Some(start + chrono::Duration::seconds(5)), None),
            )
            .await
            .unwrap();
        assert_eq!(recent.total_count, 1);
        assert_eq!(recent.time_series[0].labels, labels([("engine", "k6")]));
        assert_eq!(recent.time_series[0].data_points.len(), 1);

        let by_type = store
            .query(&MetricQuery::new().with_type(MetricType::Counter))
            .await
            .unwrap();
        assert_eq!(by_type.total_count, 1);
        assert_eq!(by_type.time_series[0].name, "error.count");
    }

    #[tokio::test]
    async fn test_delete_points_and_series() {
        let (store, clock) = default_store();
        let none = Labels::new();
        let start = clock.now();

        for v in 0..4 {
            store.record_value("queue.depth", &none, v as f64).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }
        store.record_value("queue.size", &none, 1.0).await.unwrap();

        let removed = store
            .delete(
                &MetricQuery::for_metric("queue.depth")
                    .with_range(None, Some(start + chrono::Duration::seconds(1))),
            )
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.series_count().await, 2);

        let removed = store.delete(&MetricQuery::for_metric("queue.depth")).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.series_count().await, 1);
    }

    #[tokio::test]
    async fn test_aggregate_missing_series_is_zero() {
        let (store, _clock) = default_store();
        let value = store
            .aggregate("missing.metric", AggregationType::Average, None, &Labels::new())
            .await;
        assert_eq!(value, 0.0);
        assert_eq!(store.get_statistics().await.data_points, 0);
    }

    #[tokio::test]
    async fn test_aggregate_time_window() {
        let (store, clock) = default_store();
        let none = Labels::new();

        store.record_value("queue.depth", &none, 100.0).await.unwrap();
        clock.advance(Duration::from_secs(120));
        store.record_value("queue.depth", &none, 2.0).await.unwrap();
        store.record_value("queue.depth", &none, 4.0).await.unwrap();

        let windowed = store
            .aggregate(
                "queue.depth",
                AggregationType::Average,
                Some(Duration::from_secs(60)),
                &none,
            )
            .await;
        assert_eq!(windowed, 3.0);

        let all = store
            .aggregate("queue.depth", AggregationType::Max, None, &none)
            .await;
        assert_eq!(all, 100.0);
    }

    #[tokio::test]
    async fn test_increment_is_read_then_write() {
        let (store, _clock) = default_store();
        let none = Labels::new();

        assert_eq!(store.increment("error.count", &none, 1.0).await.unwrap(), 1.0);
        assert_eq!(store.increment("error.count", &none, 2.5).await.unwrap(), 3.5);
        assert_eq!(store.latest("error.count", &none).await.unwrap().value, 3.5);
    }

    #[tokio::test]
    async fn test_counter_never_decreases_except_on_reset() {
        let (store, _clock) = default_store();
        let none = Labels::new();

        store.increment("error.count", &none, 10.0).await.unwrap();
        let lower = store.record_value("error.count", &none, 3.0).await;
        assert!(matches!(lower, Err(Error::InvalidValue(_))));
        let stale = DataPoint::new(store.clock().now(), 4.0);
        assert!(store.store(stale, "error.count", &none).await.is_err());
        assert!(store.increment("error.count", &none, -1.0).await.is_err());
        assert_eq!(store.latest("error.count", &none).await.unwrap().value, 10.0);

        store.record_value("error.count", &none, 12.0).await.unwrap();
        store.reset("error.count", &none).await.unwrap();
        assert_eq!(store.latest("error.count", &none).await.unwrap().value, 0.0);
    }

    #[tokio::test]
    async fn test_writes_reject_invalid_names() {
        let (store, clock) = default_store();
        let none = Labels::new();

        let recorded = store.record_value("Bad Name!", &none, 1.0).await;
        assert!(matches!(recorded, Err(Error::InvalidMetricName(_))));
        let incremented = store.increment("Also-Bad", &none, 1.0).await;
        assert!(matches!(incremented, Err(Error::InvalidMetricName(_))));
        assert!(store
            .store(DataPoint::new(clock.now(), 1.0), "a b", &none)
            .await
            .is_err());
        assert!(store.reset("9lives", &none).await.is_err());

        assert_eq!(store.get_statistics().await.total_metrics, 0);
        assert_eq!(store.series_count().await, 0);
    }

    #[tokio::test]
    async fn test_timestamps_truncated_to_millis() {
        let (store, clock) = default_store();
        let none = Labels::new();
        clock.set(DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap());

        let point = store.record_value("queue.depth", &none, 1.0).await.unwrap();
        assert_eq!(point.timestamp.timestamp_subsec_nanos(), 123_000_000);

        store.increment("error.count", &none, 1.0).await.unwrap();
        store
            .store(DataPoint::new(clock.now(), 2.0), "queue.size", &none)
            .await
            .unwrap();
        for name in ["error.count", "queue.size"] {
            let latest = store.latest(name, &none).await.unwrap();
            assert_eq!(latest.timestamp.timestamp_subsec_nanos(), 123_000_000);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let (store, _clock) = default_store();
        let store = Arc::new(store);
        let l = labels([("engine", "k6")]);

        let mut handles = Vec::new();
        for _ in 0..200 {
            let store = store.clone();
            let l = l.clone();
            handles.push(tokio::spawn(async move {
                store.increment("test.execution_count", &l, 1.0).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.latest("test.execution_count", &l).await.unwrap().value, 200.0);
    }

    #[tokio::test]
    async fn test_statistics_by_type_and_category() {
        let (store, _clock) = default_store();
        let none = Labels::new();

        store.record_value("error.rate", &none, 1.0).await.unwrap();
        store.record_value("error.count", &none, 1.0).await.unwrap();
        store.record_value("service.response_time", &none, 120.0).await.unwrap();

        let stats = store.get_statistics().await;
        assert_eq!(stats.total_metrics, 3);
        assert_eq!(stats.metrics_by_category[&MetricCategory::Error], 2);
        assert_eq!(stats.metrics_by_type[&MetricType::Timer], 1);
        assert!(stats.storage_size > 0);
    }

    #[tokio::test]
    async fn test_rollup_caps_window() {
        let (store, clock) = store_with_clock(100, Duration::from_secs(60));
        let none = Labels::new();

        for v in 0..6 {
            store.record_value("queue.depth", &none, v as f64).await.unwrap();
            clock.advance(Duration::from_secs(10));
        }

        let buckets = store
            .rollup(
                "queue.depth",
                &none,
                Duration::from_secs(30),
                AggregationType::Count,
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
        let total: usize = buckets.iter().map(|b| b.count).sum();
        assert_eq!(total, 6);

        assert!(store
            .rollup("queue.depth", &none, Duration::ZERO, AggregationType::Sum, Duration::from_secs(60))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_cleanup_task_start_stop() {
        let (store, _clock) = default_store();

        store.start_cleanup_task(Duration::from_millis(10)).await;
        store.start_cleanup_task(Duration::from_millis(10)).await;
        assert!(store.is_cleanup_running().await);

        store.stop_cleanup_task().await;
        store.stop_cleanup_task().await;
        assert!(!store.is_cleanup_running().await);
    }
}
