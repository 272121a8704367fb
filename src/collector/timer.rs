//! 経過時間計測ハンドル

use super::MetricsCollector;
use crate::error::Result;
use crate::metrics::Labels;
use chrono::{DateTime, Utc};

/// `start_timer` が返すハンドル
///
/// `stop` で経過時間（ms）を `timer` として記録する。
#[must_use = "the timer records nothing unless stopped"]
pub struct TimerHandle {
    collector: MetricsCollector,
    name: String,
    labels: Labels,
    started_at: DateTime<Utc>,
}

impl TimerHandle {
    pub(crate) fn new(collector: MetricsCollector, name: String, labels: Labels) -> Self {
        let started_at = collector.clock().now();
        Self {
            collector,
            name,
            labels,
            started_at,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// 計測を終了して記録し、経過時間（ms）を返す
    pub async fn stop(self) -> Result<f64> {
        let elapsed = self.collector.clock().now() - self.started_at;
        let elapsed_ms = elapsed
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or(elapsed.num_milliseconds() as f64)
            .max(0.0);
        self.collector
            .timer(&self.name, elapsed_ms, &self.labels)
            .await?;
        Ok(elapsed_ms)
    }
}
