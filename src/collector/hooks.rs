//! 記録時フック
//!
//! `record` の直後に同期的に呼ばれる高速経路。定期評価ループの代替ではない。

use crate::metrics::{Labels, MetricDefinition};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// 記録時フック
pub trait AlertHook: Send + Sync {
    /// フック名
    fn name(&self) -> &str;

    /// 値が記録された直後に呼ばれる
    fn on_record(&self, metric: &str, value: f64, labels: &Labels);
}

/// メトリクス定義の警告・致命的閾値を超えた値をログに出すフック
pub struct DefinitionThresholdHook {
    definition: MetricDefinition,
    warning_breaches: AtomicU64,
    critical_breaches: AtomicU64,
}

impl DefinitionThresholdHook {
    pub const NAME: &'static str = "definition-threshold";

    pub fn new(definition: MetricDefinition) -> Self {
        Self {
            definition,
            warning_breaches: AtomicU64::new(0),
            critical_breaches: AtomicU64::new(0),
        }
    }

    /// 警告閾値超過の回数（致命的を除く）
    pub fn warning_breaches(&self) -> u64 {
        self.warning_breaches.load(Ordering::Relaxed)
    }

    /// 致命的閾値超過の回数
    pub fn critical_breaches(&self) -> u64 {
        self.critical_breaches.load(Ordering::Relaxed)
    }
}

impl AlertHook for DefinitionThresholdHook {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn on_record(&self, metric: &str, value: f64, labels: &Labels) {
        let def = &self.definition;
        if let Some(critical) = def.critical_threshold.filter(|t| value >= *t) {
            self.critical_breaches.fetch_add(1, Ordering::Relaxed);
            warn!(
                metric,
                ?labels,
                "Critical threshold exceeded: {} {} (threshold: {} {})",
                value,
                def.unit,
                critical,
                def.unit
            );
        } else if let Some(warning) = def.warning_threshold.filter(|t| value >= *t) {
            self.warning_breaches.fetch_add(1, Ordering::Relaxed);
            warn!(
                metric,
                ?labels,
                "Warning threshold exceeded: {} {} (threshold: {} {})",
                value,
                def.unit,
                warning,
                def.unit
            );
        }
    }
}
