//! Alert Rule Types

use super::condition::{AlertCondition, AlertSeverity};
use crate::clock::elapsed_between;
use crate::config::{duration_ms, duration_ms_opt};
use crate::error::{Error, Result};
use crate::metrics::{validate_metric_name, Labels};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// アラートルール
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// ルールID（エンジンが採番）
    pub id: String,
    /// ルール名
    pub name: String,
    /// 対象メトリクス
    pub metric: String,
    /// 対象系列のラベル（空なら無ラベル系列）
    #[serde(default)]
    pub labels: Labels,
    /// 条件
    pub condition: AlertCondition,
    /// 重大度
    pub severity: AlertSeverity,
    /// 有効フラグ
    pub enabled: bool,
    /// 再発火までの最小間隔（ms）
    #[serde(with = "duration_ms")]
    pub cooldown: Duration,
    /// 通知先チャネルID（空なら既定のチャネル）
    #[serde(default)]
    pub channels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 最後に発火した時刻
    pub last_triggered: Option<DateTime<Utc>>,
    /// 条件が成立し始めた時刻
    pub pending_since: Option<DateTime<Utc>>,
}

/// ルールの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertRuleStatus {
    Disabled,
    Enabled,
    /// 条件成立中だが継続時間に達していない
    Pending,
    /// 発火後のクールダウン中
    Cooldown,
}

/// 1回の観測によるルールの遷移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Fired,
    Pending,
    Suppressed,
    Cleared,
}

impl AlertRule {
    /// クールダウン中か
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered
            .is_some_and(|at| elapsed_between(at, now) < self.cooldown)
    }

    /// 現在の状態
    pub fn status(&self, now: DateTime<Utc>) -> AlertRuleStatus {
        if !self.enabled {
            AlertRuleStatus::Disabled
        } else if self.in_cooldown(now) {
            AlertRuleStatus::Cooldown
        } else if self.pending_since.is_some() && self.condition.duration.is_some() {
            AlertRuleStatus::Pending
        } else {
            AlertRuleStatus::Enabled
        }
    }

    /// 評価値を反映して遷移を決める
    pub(crate) fn observe(&mut self, value: f64, now: DateTime<Utc>) -> Transition {
        if !self.condition.is_met(value) {
            self.pending_since = None;
            return Transition::Cleared;
        }

        let since = *self.pending_since.get_or_insert(now);
        if let Some(required) = self.condition.duration {
            if elapsed_between(since, now) < required {
                return Transition::Pending;
            }
        }

        if self.in_cooldown(now) {
            return Transition::Suppressed;
        }

        self.last_triggered = Some(now);
        Transition::Fired
    }

    pub(crate) fn apply(&mut self, update: AlertRuleUpdate, now: DateTime<Utc>) -> Result<()> {
        let mut next = self.clone();
        if let Some(name) = update.name {
            next.name = name;
        }
        if let Some(metric) = update.metric {
            next.metric = metric;
        }
        if let Some(labels) = update.labels {
            next.labels = labels;
        }
        if let Some(condition) = update.condition {
            next.condition = condition;
            next.pending_since = None;
        }
        if let Some(severity) = update.severity {
            next.severity = severity;
        }
        if let Some(enabled) = update.enabled {
            next.enabled = enabled;
            if !enabled {
                next.pending_since = None;
            }
        }
        if let Some(cooldown) = update.cooldown {
            next.cooldown = cooldown;
        }
        if let Some(channels) = update.channels {
            next.channels = channels;
        }
        validate_rule(&next.name, &next.metric, &next.condition)?;

        next.updated_at = now;
        *self = next;
        Ok(())
    }
}

/// ルール作成リクエスト
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlertRule {
    pub name: String,
    pub metric: String,
    #[serde(default)]
    pub labels: Labels,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 未指定ならエンジン既定のクールダウン
    #[serde(default, with = "duration_ms_opt")]
    pub cooldown: Option<Duration>,
    #[serde(default)]
    pub channels: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl NewAlertRule {
    pub fn new(
        name: impl Into<String>,
        metric: impl Into<String>,
        condition: AlertCondition,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            labels: Labels::new(),
            condition,
            severity,
            enabled: true,
            cooldown: None,
            channels: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// 無効状態で作成する
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub(crate) fn into_rule(
        self,
        id: String,
        default_cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<AlertRule> {
        validate_rule(&self.name, &self.metric, &self.condition)?;
        Ok(AlertRule {
            id,
            name: self.name,
            metric: self.metric,
            labels: self.labels,
            condition: self.condition,
            severity: self.severity,
            enabled: self.enabled,
            cooldown: self.cooldown.unwrap_or(default_cooldown),
            channels: self.channels,
            created_at: now,
            updated_at: now,
            last_triggered: None,
            pending_since: None,
        })
    }
}

/// ルール更新リクエスト（`None` の項目は変更しない）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertRuleUpdate {
    pub name: Option<String>,
    pub metric: Option<String>,
    pub labels: Option<Labels>,
    pub condition: Option<AlertCondition>,
    pub severity: Option<AlertSeverity>,
    pub enabled: Option<bool>,
    #[serde(with = "duration_ms_opt")]
    pub cooldown: Option<Duration>,
    pub channels: Option<Vec<String>>,
}

fn validate_rule(name: &str, metric: &str, condition: &AlertCondition) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidRule("rule name must not be empty".to_string()));
    }
    validate_metric_name(metric)?;
    condition.validate()
}
