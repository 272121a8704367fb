//! ログ初期化
//!
//! ライブラリ自身はサブスクライバーを設定しない。組み込み側が起動時に
//! `init_logging` を一度だけ呼ぶ。

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// ログファイル名の接頭辞
pub const LOG_FILE_PREFIX: &str = "testweb-metrics.log";

/// 出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 人間向けのテキスト
    Text,
    /// 1行1オブジェクトのJSON
    Json,
}

/// ファイルローテーション
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// ログレベル (trace, debug, info, warn, error)。`RUST_LOG` が優先される
    pub level: String,
    pub format: LogFormat,
    /// コンソール出力有効
    pub console_enabled: bool,
    /// 指定時はこのディレクトリにもファイル出力する
    pub log_dir: Option<PathBuf>,
    pub rotation: LogRotation,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            console_enabled: true,
            log_dir: None,
            rotation: LogRotation::Daily,
        }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// コンソール出力制御
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console_enabled = enabled;
        self
    }

    /// ファイル出力先を設定
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>, rotation: LogRotation) -> Self {
        self.log_dir = Some(dir.into());
        self.rotation = rotation;
        self
    }
}

/// ファイル出力のバックグラウンドライターを保持する
///
/// ドロップするとバッファがフラッシュされ、以降のファイル出力は失われる。
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// ログシステムを初期化
///
/// グローバルなサブスクライバーが既に設定されている場合は `Error::Config`。
pub fn init_logging(config: &LogConfig) -> Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Config(format!("invalid log level '{}': {}", config.level, e)))?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.console_enabled {
        let layer = fmt::layer().with_target(true);
        layers.push(match config.format {
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Text => layer.boxed(),
        });
    }

    let mut worker = None;
    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::Config(format!("cannot create log directory {}: {}", dir.display(), e))
        })?;
        let appender = match config.rotation {
            LogRotation::Daily => rolling::daily(dir, LOG_FILE_PREFIX),
            LogRotation::Hourly => rolling::hourly(dir, LOG_FILE_PREFIX),
            LogRotation::Never => rolling::never(dir, LOG_FILE_PREFIX),
        };
        let (writer, guard) = non_blocking(appender);
        worker = Some(guard);

        let layer = fmt::layer().with_ansi(false).with_writer(writer);
        layers.push(match config.format {
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Text => layer.boxed(),
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(
        level = %config.level,
        console = config.console_enabled,
        log_dir = ?config.log_dir,
        "Logging initialized"
    );
    Ok(LogGuard { _worker: worker })
}
