//! Metric Collector
//!
//! 記録 API（increment / set / timer / histogram / percentage / rate）と
//! 問い合わせ API（現在値・集計値・生クエリ）を提供する。
//! システムメトリクスの定期サンプリングもここで行う。

mod hooks;
mod performance;
mod sampler;
mod timer;

pub use hooks::{AlertHook, DefinitionThresholdHook};
pub use performance::{PerformanceMetrics, ERROR_RATE_DECAY, ERROR_RATE_INCREMENT};
pub use sampler::{ProcessSampler, SystemSample, SystemSampler};
pub use timer::TimerHandle;

use crate::clock::{system_clock, Clock};
use crate::config::MetricsConfig;
use crate::error::{Error, Result};
use crate::metrics::{
    validate_metric_name, AggregationType, Labels, MetricDefinition, MetricQuery,
    MetricQueryResult, MetricRegistry, RollupBucket,
};
use crate::storage::{StoreConfig, StoreStatistics, TimeSeriesStore};
use performance::PerformanceTracker;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type HookMap = HashMap<String, Vec<Arc<dyn AlertHook>>>;

/// コレクターのビルダー
pub struct MetricsCollectorBuilder {
    config: MetricsConfig,
    clock: Option<Arc<dyn Clock>>,
    registry: Option<Arc<MetricRegistry>>,
    store: Option<TimeSeriesStore>,
    sampler: Option<Arc<dyn SystemSampler>>,
    start_cleanup: bool,
}

impl MetricsCollectorBuilder {
    /// 時刻ソースを差し替える（`store` と同時には指定できない）
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn registry(mut self, registry: Arc<MetricRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 外部所有のストアを注入する（`destroy` はこのストアを解放しない）
    ///
    /// 時刻ソースとレジストリはストアのものを使う。
    pub fn store(mut self, store: TimeSeriesStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sampler(mut self, sampler: Arc<dyn SystemSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// 所有ストアの定期クリーンアップを起動するか（既定: true）
    pub fn start_cleanup(mut self, enabled: bool) -> Self {
        self.start_cleanup = enabled;
        self
    }

    /// コレクターを構築する
    pub async fn build(self) -> Result<MetricsCollector> {
        self.config.validate()?;
        if self.store.is_some() && self.clock.is_some() {
            return Err(Error::Config(
                "an injected store carries its own clock; do not set both".to_string(),
            ));
        }

        let (store, owns_store) = match self.store {
            Some(store) => (store, false),
            None => {
                let clock = self.clock.clone().unwrap_or_else(system_clock);
                let registry = self
                    .registry
                    .clone()
                    .unwrap_or_else(|| Arc::new(MetricRegistry::with_defaults()));
                (
                    TimeSeriesStore::new(StoreConfig::from(&self.config), registry, clock),
                    true,
                )
            }
        };

        let collector = MetricsCollector {
            clock: store.clock().clone(),
            config: Arc::new(self.config),
            store,
            owns_store,
            hooks: Arc::new(RwLock::new(HashMap::new())),
            performance: Arc::new(RwLock::new(PerformanceTracker::new())),
            sampler: self
                .sampler
                .unwrap_or_else(|| Arc::new(ProcessSampler::new())),
            auto_task: Arc::new(Mutex::new(None)),
            destroyed: Arc::new(AtomicBool::new(false)),
        };

        if collector.config.alerts.enabled {
            for definition in collector.registry().list().await {
                collector.install_threshold_hook(&definition).await;
            }
        }

        if collector.owns_store && self.start_cleanup {
            collector
                .store
                .start_cleanup_task(collector.config.storage.cleanup_interval)
                .await;
        }

        info!(
            "Metrics collector initialized (enabled: {}, owns store: {})",
            collector.config.enabled, collector.owns_store
        );
        Ok(collector)
    }
}

/// メトリクスコレクター
#[derive(Clone)]
pub struct MetricsCollector {
    config: Arc<MetricsConfig>,
    store: TimeSeriesStore,
    owns_store: bool,
    clock: Arc<dyn Clock>,
    hooks: Arc<RwLock<HookMap>>,
    performance: Arc<RwLock<PerformanceTracker>>,
    sampler: Arc<dyn SystemSampler>,
    auto_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    destroyed: Arc<AtomicBool>,
}

impl MetricsCollector {
    /// ビルダーを作成
    pub fn builder(config: MetricsConfig) -> MetricsCollectorBuilder {
        MetricsCollectorBuilder {
            config,
            clock: None,
            registry: None,
            store: None,
            sampler: None,
            start_cleanup: true,
        }
    }

    /// 既定構成（実時間クロック・定義済みカタログ・専用ストア）で作成
    pub async fn new(config: MetricsConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        self.store.registry()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// 値を記録する
    ///
    /// 無効化されている場合は何もしない。ストアの失敗は呼び出し側に伝播する。
    /// カウンター型のメトリクスに現在値より小さい値を書くと `InvalidValue`。
    pub async fn record(&self, name: &str, value: f64, labels: &Labels) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let started = Instant::now();
        let result = self.record_inner(name, value, labels).await;
        self.performance
            .write()
            .await
            .record_collection(started.elapsed(), result.is_ok());

        if let Err(e) = &result {
            debug!("Failed to record {}: {}", name, e);
        }
        result
    }

    async fn record_inner(&self, name: &str, value: f64, labels: &Labels) -> Result<()> {
        validate_metric_name(name)?;
        ensure_finite(name, value)?;

        let store_started = Instant::now();
        let point = self.store.record_value(name, labels, value).await?;
        self.performance
            .write()
            .await
            .record_storage(store_started.elapsed());

        self.run_hooks(name, point.value, labels).await;
        Ok(())
    }

    /// カウンターを `delta` だけ増やし、新しい値を返す
    ///
    /// 読み取りと書き込みは系列ロックの下で一括して行われるため、
    /// 同一系列への並行 increment で更新が失われることはない。
    pub async fn increment(&self, name: &str, delta: f64, labels: &Labels) -> Result<f64> {
        if !self.config.enabled {
            return Ok(self.get_current_value(name, labels).await);
        }

        let started = Instant::now();
        let result = self.increment_inner(name, delta, labels).await;
        self.performance
            .write()
            .await
            .record_collection(started.elapsed(), result.is_ok());
        result
    }

    async fn increment_inner(&self, name: &str, delta: f64, labels: &Labels) -> Result<f64> {
        validate_metric_name(name)?;
        ensure_finite(name, delta)?;

        let store_started = Instant::now();
        let value = self.store.increment(name, labels, delta).await?;
        self.performance
            .write()
            .await
            .record_storage(store_started.elapsed());

        self.run_hooks(name, value, labels).await;
        Ok(value)
    }

    /// ゲージ値を設定
    pub async fn set(&self, name: &str, value: f64, labels: &Labels) -> Result<()> {
        self.record(name, value, labels).await
    }

    /// 系列を 0 に戻す（カウンターが減少してよい唯一の操作）
    pub async fn reset(&self, name: &str, labels: &Labels) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let started = Instant::now();
        let result = self.store.reset(name, labels).await;
        self.performance
            .write()
            .await
            .record_collection(started.elapsed(), result.is_ok());

        let point = result?;
        debug!("Reset {} ({:?})", name, point.labels);
        self.run_hooks(name, point.value, labels).await;
        Ok(())
    }

    /// 所要時間（ms）を記録
    pub async fn timer(&self, name: &str, duration_ms: f64, labels: &Labels) -> Result<()> {
        if duration_ms < 0.0 {
            return Err(Error::InvalidValue(format!(
                "negative duration for {}: {}",
                name, duration_ms
            )));
        }
        self.record(name, duration_ms, labels).await
    }

    /// 計測を開始する。返されたハンドルの `stop` で `timer` が記録される。
    pub fn start_timer(&self, name: &str, labels: &Labels) -> TimerHandle {
        TimerHandle::new(self.clone(), name.to_string(), labels.clone())
    }

    /// 分布の1サンプルを記録
    pub async fn histogram(&self, name: &str, value: f64, labels: &Labels) -> Result<()> {
        self.record(name, value, labels).await
    }

    /// 0〜100 の割合を記録
    pub async fn percentage(&self, name: &str, value: f64, labels: &Labels) -> Result<()> {
        if !(0.0..=100.0).contains(&value) {
            return Err(Error::InvalidValue(format!(
                "percentage out of range for {}: {}",
                name, value
            )));
        }
        self.record(name, value, labels).await
    }

    /// 単位時間あたりの量を記録
    pub async fn rate(&self, name: &str, per_second: f64, labels: &Labels) -> Result<()> {
        self.record(name, per_second, labels).await
    }

    /// 系列の最新値（系列が無ければ 0）
    pub async fn get_current_value(&self, name: &str, labels: &Labels) -> f64 {
        self.store
            .latest(name, labels)
            .await
            .map_or(0.0, |point| point.value)
    }

    /// 系列の集計値（データが無ければ 0）
    pub async fn get_aggregated_value(
        &self,
        name: &str,
        aggregation: AggregationType,
        time_window: Option<Duration>,
        labels: &Labels,
    ) -> f64 {
        self.store
            .aggregate(name, aggregation, time_window, labels)
            .await
    }

    /// 生クエリ
    pub async fn query(&self, query: &MetricQuery) -> Result<MetricQueryResult> {
        let started = Instant::now();
        let result = self.store.query(query).await;
        self.performance
            .write()
            .await
            .record_query(started.elapsed(), result.is_ok());
        result
    }

    /// クエリに一致するデータポイントを削除
    pub async fn delete(&self, query: &MetricQuery) -> Result<usize> {
        self.store.delete(query).await
    }

    /// 一定間隔バケットでの集計
    pub async fn rollup(
        &self,
        name: &str,
        labels: &Labels,
        interval: Duration,
        aggregation: AggregationType,
        window: Duration,
    ) -> Result<Vec<RollupBucket>> {
        self.store
            .rollup(name, labels, interval, aggregation, window)
            .await
    }

    /// ストア統計
    pub async fn statistics(&self) -> StoreStatistics {
        self.store.get_statistics().await
    }

    /// 性能指標
    pub async fn get_performance_metrics(&self) -> PerformanceMetrics {
        self.performance.read().await.snapshot()
    }

    /// メトリクス定義を追加・上書きする
    pub async fn register_metric(&self, definition: MetricDefinition) -> Result<()> {
        self.registry().register(definition.clone()).await?;
        if self.config.alerts.enabled {
            self.install_threshold_hook(&definition).await;
        }
        Ok(())
    }

    /// 記録時フックを登録
    pub async fn register_hook(&self, metric: &str, hook: Arc<dyn AlertHook>) -> Result<()> {
        validate_metric_name(metric)?;
        let mut hooks = self.hooks.write().await;
        hooks.entry(metric.to_string()).or_default().push(hook);
        Ok(())
    }

    /// メトリクスに登録されたフック
    pub async fn hooks_for(&self, metric: &str) -> Vec<Arc<dyn AlertHook>> {
        let hooks = self.hooks.read().await;
        hooks.get(metric).cloned().unwrap_or_default()
    }

    async fn install_threshold_hook(&self, definition: &MetricDefinition) {
        let mut hooks = self.hooks.write().await;
        let entry = hooks.entry(definition.name.clone()).or_default();
        entry.retain(|hook| hook.name() != DefinitionThresholdHook::NAME);
        if definition.has_thresholds() {
            entry.push(Arc::new(DefinitionThresholdHook::new(definition.clone())));
        }
    }

    async fn run_hooks(&self, name: &str, value: f64, labels: &Labels) {
        let hooks = {
            let hooks = self.hooks.read().await;
            match hooks.get(name) {
                Some(list) if !list.is_empty() => list.clone(),
                _ => return,
            }
        };
        for hook in hooks {
            hook.on_record(name, value, labels);
        }
    }

    /// システムメトリクスを1回サンプリングして記録し、記録件数を返す
    pub async fn sample_system_metrics(&self) -> Result<usize> {
        let sampler = self.sampler.clone();
        let samples = tokio::task::spawn_blocking(move || sampler.sample())
            .await
            .map_err(|e| Error::Storage(format!("system sampler task failed: {}", e)))?;

        let mut recorded = 0;
        for sample in samples {
            match self.record(&sample.name, sample.value, &sample.labels).await {
                Ok(()) => recorded += 1,
                Err(e) => warn!("Failed to record system metric {}: {}", sample.name, e),
            }
        }
        Ok(recorded)
    }

    /// システムメトリクスの定期収集を開始（実行中なら先に停止）
    pub async fn start_auto_collection(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::Config("collection interval must be positive".to_string()));
        }

        let mut task = self.auto_task.lock().await;
        if let Some(previous) = task.take() {
            cancel(previous).await;
            debug!("Replaced running auto collection task");
        }

        let collector = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = collector.sample_system_metrics().await {
                    error!("System metrics collection failed: {}", e);
                }
            }
        });
        *task = Some(handle);
        info!("Started auto collection (interval: {:?})", interval);
        Ok(())
    }

    /// 定期収集を停止し、実行中のサンプリングが終わるのを待つ
    pub async fn stop_auto_collection(&self) {
        let mut task = self.auto_task.lock().await;
        if let Some(handle) = task.take() {
            cancel(handle).await;
            info!("Stopped auto collection");
        }
    }

    /// 定期収集が動作中か
    pub async fn is_auto_collecting(&self) -> bool {
        self.auto_task.lock().await.is_some()
    }

    /// 全タイマーを停止し、所有しているストアを解放する（冪等）
    pub async fn destroy(&self) {
        self.stop_auto_collection().await;
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.owns_store {
            self.store.stop_cleanup_task().await;
            self.store.clear().await;
        }
        info!("Metrics collector destroyed");
    }
}

async fn cancel(handle: JoinHandle<()>) {
    handle.abort();
    if let Err(e) = handle.await {
        if !e.is_cancelled() {
            error!("Auto collection task failed: {}", e);
        }
    }
}

fn ensure_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidValue(format!(
            "non-finite value for {}: {}",
            name, value
        )))
    }
}
