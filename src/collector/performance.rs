//! コレクター自身の性能指標

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// 失敗1回ごとのエラー率の増分
pub const ERROR_RATE_INCREMENT: f64 = 0.01;
/// 成功1回ごとのエラー率の減衰量
pub const ERROR_RATE_DECAY: f64 = 0.001;

const LATENCY_SMOOTHING: f64 = 0.1;

/// 性能指標のスナップショット
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// record 全体の平滑化レイテンシ（ms）
    pub collection_latency: f64,
    /// query の平滑化レイテンシ（ms）
    pub query_latency: f64,
    /// ストア書き込みの平滑化レイテンシ（ms）
    pub storage_latency: f64,
    /// 起動以降の記録スループット（件/秒）
    pub throughput: f64,
    /// 0〜1 のエラー率
    pub error_rate: f64,
}

/// 性能指標の集計器
#[derive(Debug)]
pub(crate) struct PerformanceTracker {
    metrics: PerformanceMetrics,
    started_at: Instant,
    records: u64,
}

impl PerformanceTracker {
    pub(crate) fn new() -> Self {
        Self {
            metrics: PerformanceMetrics::default(),
            started_at: Instant::now(),
            records: 0,
        }
    }

    pub(crate) fn record_collection(&mut self, latency: Duration, success: bool) {
        smooth(&mut self.metrics.collection_latency, latency, self.records == 0);
        if success {
            self.records += 1;
        }
        self.record_outcome(success);
    }

    pub(crate) fn record_storage(&mut self, latency: Duration) {
        smooth(&mut self.metrics.storage_latency, latency, self.records == 0);
    }

    pub(crate) fn record_query(&mut self, latency: Duration, success: bool) {
        let first = self.metrics.query_latency == 0.0;
        smooth(&mut self.metrics.query_latency, latency, first);
        self.record_outcome(success);
    }

    pub(crate) fn record_outcome(&mut self, success: bool) {
        let rate = if success {
            self.metrics.error_rate - ERROR_RATE_DECAY
        } else {
            self.metrics.error_rate + ERROR_RATE_INCREMENT
        };
        self.metrics.error_rate = rate.clamp(0.0, 1.0);
    }

    pub(crate) fn snapshot(&self) -> PerformanceMetrics {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let throughput = if elapsed > 0.0 {
            self.records as f64 / elapsed
        } else {
            0.0
        };
        PerformanceMetrics {
            throughput,
            ..self.metrics
        }
    }
}

fn smooth(current: &mut f64, sample: Duration, first: bool) {
    let sample_ms = sample.as_secs_f64() * 1000.0;
    *current = if first {
        sample_ms
    } else {
        *current * (1.0 - LATENCY_SMOOTHING) + sample_ms * LATENCY_SMOOTHING
    };
}
