//! Alert Engine Implementation
//!
//! ルールごとに現在値または集計値を解決し、条件・継続時間・クールダウンを
//! 判定してイベントを発行する。通知の失敗はチャネル単位で隔離される。

use super::channel::{ChannelDescriptor, LogChannel, NotificationChannel};
use super::condition::{AlertCondition, AlertSeverity, Comparison};
use super::event::{AlertEvent, AlertStats};
use super::rule::{AlertRule, AlertRuleStatus, AlertRuleUpdate, NewAlertRule, Transition};
use crate::clock::Clock;
use crate::collector::MetricsCollector;
use crate::config::AlertsConfig;
use crate::error::{Error, Result};
use futures::future::join_all;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type ChannelMap = HashMap<String, Arc<dyn NotificationChannel>>;

/// アラートエンジン
#[derive(Clone)]
pub struct AlertEngine {
    collector: MetricsCollector,
    config: Arc<AlertsConfig>,
    clock: Arc<dyn Clock>,
    rules: Arc<RwLock<HashMap<String, AlertRule>>>,
    history: Arc<RwLock<VecDeque<AlertEvent>>>,
    channels: Arc<RwLock<ChannelMap>>,
    /// 評価とルール更新を直列化する（通知の送信中は保持しない）
    evaluation: Arc<Mutex<()>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AlertEngine {
    /// 新しいアラートエンジンを作成（`log` チャネルは登録済み）
    pub fn new(collector: MetricsCollector) -> Self {
        let mut channels: ChannelMap = HashMap::new();
        let log = LogChannel::default();
        channels.insert(log.id().to_string(), Arc::new(log));

        Self {
            config: Arc::new(collector.config().alerts.clone()),
            clock: collector.clock().clone(),
            collector,
            rules: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            channels: Arc::new(RwLock::new(channels)),
            evaluation: Arc::new(Mutex::new(())),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &AlertsConfig {
        &self.config
    }

    /// ルールを作成
    pub async fn create_alert_rule(&self, request: NewAlertRule) -> Result<AlertRule> {
        let id = uuid::Uuid::new_v4().to_string();
        let rule = request.into_rule(id, self.config.default_cooldown, self.clock.now())?;

        let mut rules = self.rules.write().await;
        rules.insert(rule.id.clone(), rule.clone());
        info!("Created alert rule {} ({})", rule.name, rule.id);
        Ok(rule)
    }

    /// ルールを更新
    pub async fn update_alert_rule(&self, id: &str, update: AlertRuleUpdate) -> Result<AlertRule> {
        let _evaluation = self.evaluation.lock().await;
        let mut rules = self.rules.write().await;
        let rule = rules
            .get_mut(id)
            .ok_or_else(|| Error::RuleNotFound(id.to_string()))?;

        rule.apply(update, self.clock.now())?;
        info!("Updated alert rule {} ({})", rule.name, rule.id);
        Ok(rule.clone())
    }

    /// ルールを削除（履歴は残る）
    pub async fn delete_alert_rule(&self, id: &str) -> Result<AlertRule> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .remove(id)
            .ok_or_else(|| Error::RuleNotFound(id.to_string()))?;
        info!("Deleted alert rule {} ({})", rule.name, rule.id);
        Ok(rule)
    }

    pub async fn get_alert_rule(&self, id: &str) -> Option<AlertRule> {
        self.rules.read().await.get(id).cloned()
    }

    /// 全ルール（作成順）
    pub async fn get_all_alert_rules(&self) -> Vec<AlertRule> {
        let rules = self.rules.read().await;
        let mut all: Vec<AlertRule> = rules.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        all
    }

    /// ルールの状態
    pub async fn get_rule_status(&self, id: &str) -> Option<AlertRuleStatus> {
        let now = self.clock.now();
        self.rules.read().await.get(id).map(|rule| rule.status(now))
    }

    /// アラート履歴（新しい順）
    pub async fn get_alert_history(&self, limit: Option<usize>) -> Vec<AlertEvent> {
        let history = self.history.read().await;
        history
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// 未解決のイベント（新しい順）
    pub async fn get_active_alerts(&self) -> Vec<AlertEvent> {
        let history = self.history.read().await;
        history
            .iter()
            .rev()
            .filter(|event| !event.resolved)
            .cloned()
            .collect()
    }

    /// イベントを手動で解決する。未解決のイベントが見つかれば true
    pub async fn resolve_alert(&self, event_id: &str) -> bool {
        let now = self.clock.now();
        let mut history = self.history.write().await;
        match history
            .iter_mut()
            .find(|event| event.id == event_id && !event.resolved)
        {
            Some(event) => {
                event.resolve(now);
                info!("Resolved alert event {}", event_id);
                true
            }
            None => false,
        }
    }

    /// 統計
    pub async fn get_stats(&self) -> AlertStats {
        let mut stats = AlertStats::default();
        {
            let rules = self.rules.read().await;
            stats.total_rules = rules.len();
            stats.enabled_rules = rules.values().filter(|rule| rule.enabled).count();
        }

        let history = self.history.read().await;
        stats.total_events = history.len();
        for event in history.iter() {
            if event.resolved {
                stats.resolved_events += 1;
            } else {
                stats.active_events += 1;
                *stats.active_by_severity.entry(event.severity).or_insert(0) += 1;
            }
        }
        stats
    }

    /// チャネルを登録（同じIDは置き換え）
    pub async fn register_channel(&self, channel: Arc<dyn NotificationChannel>) {
        let id = channel.id().to_string();
        let mut channels = self.channels.write().await;
        if channels.insert(id.clone(), channel).is_some() {
            debug!("Replaced notification channel {}", id);
        }
        info!("Registered notification channel {}", id);
    }

    pub async fn remove_channel(&self, id: &str) -> bool {
        self.channels.write().await.remove(id).is_some()
    }

    /// 登録済みチャネル（ID順）
    pub async fn list_channels(&self) -> Vec<ChannelDescriptor> {
        let channels = self.channels.read().await;
        let mut list: Vec<ChannelDescriptor> = channels
            .values()
            .map(|channel| ChannelDescriptor::of(channel.as_ref()))
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// 閾値付きのメトリクス定義から警告・致命的ルールを作成する
    ///
    /// 同名のルールが既にある場合は作成しない。
    pub async fn add_default_rules(&self) -> Result<Vec<AlertRule>> {
        let existing: HashSet<String> = {
            let rules = self.rules.read().await;
            rules.values().map(|rule| rule.name.clone()).collect()
        };

        let mut created = Vec::new();
        for definition in self.collector.registry().list().await {
            let thresholds = [
                (definition.warning_threshold, AlertSeverity::Warning),
                (definition.critical_threshold, AlertSeverity::Critical),
            ];
            for (threshold, severity) in thresholds {
                let Some(threshold) = threshold else {
                    continue;
                };
                let name = format!("{} {}", definition.name, severity);
                if existing.contains(&name) {
                    continue;
                }

                let request = NewAlertRule::new(
                    name,
                    definition.name.clone(),
                    AlertCondition::new(Comparison::GreaterOrEqual, threshold),
                    severity,
                );
                created.push(self.create_alert_rule(request).await?);
            }
        }

        info!("Added {} default alert rules", created.len());
        Ok(created)
    }

    /// 全ルールを1回評価し、発火したイベントを返す
    pub async fn evaluate_once(&self) -> Vec<AlertEvent> {
        if !self.config.enabled {
            return Vec::new();
        }
        let evaluation = self.evaluation.lock().await;

        let targets: Vec<AlertRule> = {
            let rules = self.rules.read().await;
            rules.values().filter(|rule| rule.enabled).cloned().collect()
        };
        if targets.is_empty() {
            return Vec::new();
        }

        let values = join_all(targets.iter().map(|rule| self.resolve_value(rule))).await;
        let now = self.clock.now();

        let mut fired = Vec::new();
        let mut cleared = HashSet::new();
        {
            let mut rules = self.rules.write().await;
            for (target, value) in targets.iter().zip(values) {
                if !value.is_finite() {
                    warn!(
                        "Skipping alert rule {}: non-finite value {} for {}",
                        target.id, value, target.metric
                    );
                    continue;
                }
                // 評価中に削除されたルール
                let Some(rule) = rules.get_mut(&target.id) else {
                    continue;
                };

                match rule.observe(value, now) {
                    Transition::Fired => {
                        let event = AlertEvent::triggered(rule, value, now);
                        info!(
                            alert_id = %rule.id,
                            severity = %rule.severity,
                            "Alert triggered: {}",
                            event.message
                        );
                        fired.push((event, self.channel_ids(rule)));
                    }
                    Transition::Cleared => {
                        cleared.insert(rule.id.clone());
                    }
                    Transition::Pending => {
                        debug!("Alert rule {} pending (value: {})", rule.id, value);
                    }
                    Transition::Suppressed => {
                        debug!("Alert rule {} in cooldown (value: {})", rule.id, value);
                    }
                }
            }
        }

        self.append_history(&fired, &cleared, now).await;
        drop(evaluation);

        for (event, channel_ids) in &fired {
            self.notify(event, channel_ids).await;
        }
        fired.into_iter().map(|(event, _)| event).collect()
    }

    async fn resolve_value(&self, rule: &AlertRule) -> f64 {
        match rule.condition.aggregation {
            Some(aggregation) => {
                self.collector
                    .get_aggregated_value(
                        &rule.metric,
                        aggregation,
                        rule.condition.time_window,
                        &rule.labels,
                    )
                    .await
            }
            None => {
                self.collector
                    .get_current_value(&rule.metric, &rule.labels)
                    .await
            }
        }
    }

    fn channel_ids(&self, rule: &AlertRule) -> Vec<String> {
        if rule.channels.is_empty() {
            self.config.default_channels.clone()
        } else {
            rule.channels.clone()
        }
    }

    async fn append_history(
        &self,
        fired: &[(AlertEvent, Vec<String>)],
        cleared: &HashSet<String>,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        if fired.is_empty() && cleared.is_empty() {
            return;
        }

        let mut history = self.history.write().await;
        if !cleared.is_empty() {
            for event in history
                .iter_mut()
                .filter(|event| !event.resolved && cleared.contains(&event.alert_id))
            {
                event.resolve(now);
                info!("Alert resolved: {}", event.message);
            }
        }

        for (event, _) in fired {
            history.push_back(event.clone());
        }
        while history.len() > self.config.max_history {
            history.pop_front();
        }
    }

    async fn notify(&self, event: &AlertEvent, channel_ids: &[String]) {
        let targets: Vec<Arc<dyn NotificationChannel>> = {
            let channels = self.channels.read().await;
            channel_ids
                .iter()
                .filter_map(|id| {
                    let channel = channels.get(id).cloned();
                    if channel.is_none() {
                        warn!(
                            "Unknown notification channel {} for alert {}",
                            id, event.alert_id
                        );
                    }
                    channel
                })
                .filter(|channel| channel.enabled())
                .collect()
        };

        let timeout = self.config.notification_timeout;
        let deliveries = targets.iter().map(|channel| async move {
            match tokio::time::timeout(timeout, channel.send(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "Failed to send alert {} via channel {}: {}",
                    event.id,
                    channel.id(),
                    e
                ),
                Err(_) => warn!(
                    "Timed out sending alert {} via channel {} after {:?}",
                    event.id,
                    channel.id(),
                    timeout
                ),
            }
        });
        join_all(deliveries).await;
    }

    /// 定期評価を開始（実行中なら先に停止）
    pub async fn start(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::Config("evaluation interval must be positive".to_string()));
        }

        let mut task = self.task.lock().await;
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let fired = engine.evaluate_once().await;
                if !fired.is_empty() {
                    debug!("Evaluation tick fired {} alerts", fired.len());
                }
            }
        });
        *task = Some(handle);
        info!("Started alert evaluation (interval: {:?})", interval);
        Ok(())
    }

    /// 設定された間隔で定期評価を開始
    pub async fn start_default(&self) -> Result<()> {
        self.start(self.config.evaluation_interval).await
    }

    /// 定期評価を停止（冪等）
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Alert evaluation task failed: {}", e);
                }
            }
            info!("Stopped alert evaluation");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }
}
