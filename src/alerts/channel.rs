//! Notification Channels

use super::condition::AlertSeverity;
use super::event::AlertEvent;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// 通知チャネル
///
/// 配送方式（メール、Webhook、チャット等）は実装側が決める。
/// `send` のエラーはエンジンがログに記録して握りつぶす。
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// チャネルID
    fn id(&self) -> &str;

    /// 表示名
    fn name(&self) -> &str;

    /// 種別（"email", "webhook" など）
    fn channel_type(&self) -> &str;

    /// チャネル固有の設定
    fn config(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// 無効なチャネルには送信しない
    fn enabled(&self) -> bool {
        true
    }

    /// イベントを送信
    async fn send(&self, event: &AlertEvent) -> Result<()>;
}

/// チャネルの概要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub id: String,
    pub name: String,
    pub channel_type: String,
    pub config: serde_json::Value,
    pub enabled: bool,
}

impl ChannelDescriptor {
    pub fn of(channel: &dyn NotificationChannel) -> Self {
        Self {
            id: channel.id().to_string(),
            name: channel.name().to_string(),
            channel_type: channel.channel_type().to_string(),
            config: channel.config(),
            enabled: channel.enabled(),
        }
    }
}

/// tracing に出力するチャネル
#[derive(Debug, Clone)]
pub struct LogChannel {
    id: String,
}

impl LogChannel {
    pub const DEFAULT_ID: &'static str = "log";

    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ID)
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Log"
    }

    fn channel_type(&self) -> &str {
        "log"
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        match event.severity {
            AlertSeverity::Critical => error!(
                alert_id = %event.alert_id,
                metric = %event.metric,
                "[ALERT] {}",
                event.message
            ),
            AlertSeverity::Warning => warn!(
                alert_id = %event.alert_id,
                metric = %event.metric,
                "[ALERT] {}",
                event.message
            ),
            AlertSeverity::Info => info!(
                alert_id = %event.alert_id,
                metric = %event.metric,
                "[ALERT] {}",
                event.message
            ),
        }
        Ok(())
    }
}
