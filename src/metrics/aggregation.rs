//! 集計関数
//!
//! ストアとコレクターで共有される。空集合に対する集計は常に 0 を返す。

use super::DataPoint;
use crate::error::Error;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 集計関数の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Sum,
    Average,
    Min,
    Max,
    Count,
    Median,
    P95,
    P99,
    /// 1秒あたりの変化量
    Rate,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::Median => "median",
            Self::P95 => "p95",
            Self::P99 => "p99",
            Self::Rate => "rate",
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "average" | "avg" | "mean" => Ok(Self::Average),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            "median" | "p50" => Ok(Self::Median),
            "p95" => Ok(Self::P95),
            "p99" => Ok(Self::P99),
            "rate" => Ok(Self::Rate),
            other => Err(Error::InvalidQuery(format!("unknown aggregation: {}", other))),
        }
    }
}

/// データポイント集合を集計
pub fn aggregate(points: &[DataPoint], aggregation: AggregationType) -> f64 {
    if points.is_empty() {
        return 0.0;
    }

    let values = points.iter().map(|p| p.value);
    match aggregation {
        AggregationType::Sum => values.sum(),
        AggregationType::Average => values.sum::<f64>() / points.len() as f64,
        AggregationType::Min => values.fold(f64::INFINITY, f64::min),
        AggregationType::Max => values.fold(f64::NEG_INFINITY, f64::max),
        AggregationType::Count => points.len() as f64,
        AggregationType::Median => percentile(&sorted_values(points), 50.0),
        AggregationType::P95 => percentile(&sorted_values(points), 95.0),
        AggregationType::P99 => percentile(&sorted_values(points), 99.0),
        AggregationType::Rate => rate_per_second(points),
    }
}

/// 複数の集計を一度に計算
pub fn aggregate_all(
    points: &[DataPoint],
    aggregations: &[AggregationType],
) -> BTreeMap<AggregationType, f64> {
    aggregations
        .iter()
        .map(|agg| (*agg, aggregate(points, *agg)))
        .collect()
}

/// 線形補間パーセンタイル
///
/// `sorted` は昇順であること。`p` は 0〜100。
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }

    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

fn sorted_values(points: &[DataPoint]) -> Vec<f64> {
    let mut values: Vec<f64> = points.iter().map(|p| p.value).collect();
    values.sort_by(f64::total_cmp);
    values
}

fn rate_per_second(points: &[DataPoint]) -> f64 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() >= 2 => (first, last),
        _ => return 0.0,
    };

    let elapsed_ms = (last.timestamp - first.timestamp).num_milliseconds();
    if elapsed_ms <= 0 {
        return 0.0;
    }
    (last.value - first.value) / (elapsed_ms as f64 / 1000.0)
}

/// ロールアップの1バケット
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupBucket {
    /// バケット開始時刻（間隔境界に整列）
    pub start: DateTime<Utc>,
    /// 集計値
    pub value: f64,
    /// バケット内のポイント数
    pub count: usize,
}

/// 一定間隔のバケットに分けて集計する
///
/// 空のバケットは出力しない。結果は開始時刻順。
pub fn rollup(
    points: &[DataPoint],
    interval: Duration,
    aggregation: AggregationType,
) -> Vec<RollupBucket> {
    let interval_ms = interval.as_millis() as i64;
    if interval_ms <= 0 {
        return Vec::new();
    }

    let mut buckets: BTreeMap<i64, Vec<DataPoint>> = BTreeMap::new();
    for point in points {
        let ts = point.timestamp.timestamp_millis();
        let start = ts.div_euclid(interval_ms) * interval_ms;
        buckets.entry(start).or_default().push(point.clone());
    }

    buckets
        .into_iter()
        .filter_map(|(start_ms, bucket)| {
            let start = Utc.timestamp_millis_opt(start_ms).single()?;
            Some(RollupBucket {
                start,
                value: aggregate(&bucket, aggregation),
                count: bucket.len(),
            })
        })
        .collect()
}
