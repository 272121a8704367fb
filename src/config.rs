//! メトリクスサブシステム設定
//!
//! 構築時に一度だけ読み込まれる。期間はすべてミリ秒整数でシリアライズされる。

use crate::error::{Error, Result};
use crate::metrics::aggregation::AggregationType;
use anyhow::Context;
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// メトリクス設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 無効時は記録呼び出しが no-op になる
    pub enabled: bool,
    /// 保持期間
    pub retention: RetentionConfig,
    /// ストア容量とクリーンアップ
    pub storage: StorageConfig,
    /// 集計設定
    pub aggregation: AggregationConfig,
    /// アラート設定
    pub alerts: AlertsConfig,
    /// ダッシュボード設定
    pub dashboards: DashboardsConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention: RetentionConfig::default(),
            storage: StorageConfig::default(),
            aggregation: AggregationConfig::default(),
            alerts: AlertsConfig::default(),
            dashboards: DashboardsConfig::default(),
        }
    }
}

impl MetricsConfig {
    /// 設定値の整合性を検証
    pub fn validate(&self) -> Result<()> {
        if self.retention.raw.is_zero() {
            return Err(Error::Config("retention.raw must be positive".to_string()));
        }
        if self.retention.aggregated < self.retention.raw {
            return Err(Error::Config(
                "retention.aggregated must not be shorter than retention.raw".to_string(),
            ));
        }
        if self.storage.max_points_per_series == 0 {
            return Err(Error::Config(
                "storage.max_points_per_series must be positive".to_string(),
            ));
        }
        if self.storage.cleanup_interval.is_zero() {
            return Err(Error::Config(
                "storage.cleanup_interval must be positive".to_string(),
            ));
        }
        if self.aggregation.intervals.iter().any(Duration::is_zero) {
            return Err(Error::Config(
                "aggregation.intervals must be positive".to_string(),
            ));
        }
        if self.alerts.evaluation_interval.is_zero() {
            return Err(Error::Config(
                "alerts.evaluation_interval must be positive".to_string(),
            ));
        }
        if self.alerts.notification_timeout.is_zero() {
            return Err(Error::Config(
                "alerts.notification_timeout must be positive".to_string(),
            ));
        }
        if self.alerts.max_history == 0 {
            return Err(Error::Config("alerts.max_history must be positive".to_string()));
        }
        if self.dashboards.refresh_interval.is_zero() {
            return Err(Error::Config(
                "dashboards.refresh_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// 保持期間設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// 生データポイントの最大保持期間（ms）
    #[serde(with = "duration_ms")]
    pub raw: Duration,
    /// ロールアップ問い合わせで遡れる最大期間（ms）
    #[serde(with = "duration_ms")]
    pub aggregated: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw: Duration::from_secs(24 * 60 * 60),
            aggregated: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// ストア設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 系列ごとの最大データポイント数
    pub max_points_per_series: usize,
    /// 保持期間クリーンアップの実行間隔（ms）
    #[serde(with = "duration_ms")]
    pub cleanup_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_points_per_series: 10_000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// 集計設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// ロールアップ間隔（ms）
    #[serde(with = "duration_ms_vec")]
    pub intervals: Vec<Duration>,
    /// ダッシュボードで計算する集計関数
    pub functions: Vec<AggregationType>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            intervals: vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(3600),
            ],
            functions: vec![
                AggregationType::Average,
                AggregationType::Min,
                AggregationType::Max,
                AggregationType::P95,
            ],
        }
    }
}

/// アラート設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    /// 評価ループの間隔（ms）
    #[serde(with = "duration_ms")]
    pub evaluation_interval: Duration,
    /// ルール未指定時のクールダウン（ms）
    #[serde(with = "duration_ms")]
    pub default_cooldown: Duration,
    /// アラート履歴の上限件数
    pub max_history: usize,
    /// ルールにチャネル指定がない場合の通知先
    pub default_channels: Vec<String>,
    /// チャネル1件あたりの送信タイムアウト（ms）
    #[serde(with = "duration_ms")]
    pub notification_timeout: Duration,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluation_interval: Duration::from_secs(30),
            default_cooldown: Duration::from_secs(5 * 60),
            max_history: 1000,
            default_channels: vec!["log".to_string()],
            notification_timeout: Duration::from_secs(10),
        }
    }
}

/// ダッシュボード設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardsConfig {
    pub enabled: bool,
    /// 再描画間隔（ms）
    #[serde(with = "duration_ms")]
    pub refresh_interval: Duration,
}

impl Default for DashboardsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval: Duration::from_secs(30),
        }
    }
}

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    config_file: Option<PathBuf>,
    load_env: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            config_file: None,
            load_env: false,
        }
    }

    /// Load configuration from file
    pub fn load_from_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Load configuration from `METRICS_*` environment variables
    pub fn load_from_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Build and validate the final configuration
    pub fn build(self) -> Result<MetricsConfig> {
        let config = self
            .build_inner()
            .map_err(|e| Error::Config(format!("{:#}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn build_inner(&self) -> anyhow::Result<MetricsConfig> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&MetricsConfig::default())?);

        if let Some(path) = &self.config_file {
            builder = builder.add_source(File::from(path.as_path()).required(true));
        } else {
            builder = builder
                .add_source(File::with_name("metrics").required(false))
                .add_source(File::with_name("config/metrics").required(false));
        }

        if self.load_env {
            builder = builder.add_source(
                Environment::with_prefix("METRICS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: MetricsConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// `Duration` をミリ秒整数として (de)serialize する
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// `Option<Duration>` 版
pub mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

mod duration_ms_vec {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &[Duration], serializer: S) -> Result<S::Ok, S::Error> {
        let millis: Vec<u64> = value.iter().map(|d| d.as_millis() as u64).collect();
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Duration>, D::Error> {
        Ok(Vec::<u64>::deserialize(deserializer)?
            .into_iter()
            .map(Duration::from_millis)
            .collect())
    }
}
