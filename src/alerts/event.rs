//! Alert Event Types

use super::condition::AlertSeverity;
use super::rule::AlertRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 発火したアラート
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// イベントID
    pub id: String,
    /// 発火したルールのID
    pub alert_id: String,
    pub rule_name: String,
    pub metric: String,
    pub severity: AlertSeverity,
    pub message: String,
    /// 評価された値
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    /// 解決済みフラグ
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AlertEvent {
    /// ルールの発火イベントを作成
    pub fn triggered(rule: &AlertRule, value: f64, at: DateTime<Utc>) -> Self {
        let condition = &rule.condition;
        let subject = match condition.aggregation {
            Some(aggregation) => format!("{}({})", aggregation, rule.metric),
            None => rule.metric.clone(),
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            metric: rule.metric.clone(),
            severity: rule.severity,
            message: format!(
                "{}: {} = {:.2} ({} {})",
                rule.name, subject, value, condition.operator, condition.threshold
            ),
            value,
            threshold: condition.threshold,
            timestamp: at,
            resolved: false,
            resolved_at: None,
        }
    }

    /// イベントを解決
    pub fn resolve(&mut self, at: DateTime<Utc>) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(at);
        }
    }
}

/// アラート統計
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStats {
    pub total_rules: usize,
    pub enabled_rules: usize,
    /// 履歴に残っているイベント数
    pub total_events: usize,
    pub active_events: usize,
    pub resolved_events: usize,
    /// 未解決イベントの重大度別件数
    pub active_by_severity: BTreeMap<AlertSeverity, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertCondition, Comparison, NewAlertRule};
    use crate::metrics::AggregationType;
    use std::time::Duration;

    #[test]
    fn test_triggered_event_message() {
        let now = Utc::now();
        let rule = NewAlertRule::new(
            "Slow responses",
            "service.response_time",
            AlertCondition::new(Comparison::GreaterThan, 1000.0)
                .aggregated(AggregationType::P95, Duration::from_secs(300)),
            AlertSeverity::Critical,
        )
        .into_rule("rule-9".to_string(), Duration::from_secs(60), now)
        .unwrap();

        let mut event = AlertEvent::triggered(&rule, 1250.0, now);
        assert_eq!(event.alert_id, "rule-9");
        assert_eq!(event.threshold, 1000.0);
        assert_eq!(
            event.message,
            "Slow responses: p95(service.response_time) = 1250.00 (> 1000)"
        );

        event.resolve(now);
        let first = event.resolved_at;
        event.resolve(now + chrono::Duration::seconds(5));
        assert!(event.resolved);
        assert_eq!(event.resolved_at, first);
    }
}
