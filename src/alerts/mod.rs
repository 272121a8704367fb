//! Alerts Module
//!
//! 閾値ルールの管理、定期評価、通知チャネルへの配送

mod channel;
mod condition;
mod engine;
mod event;
mod rule;

pub use channel::{ChannelDescriptor, LogChannel, NotificationChannel};
pub use condition::{AlertCondition, AlertSeverity, Comparison};
pub use engine::AlertEngine;
pub use event::{AlertEvent, AlertStats};
pub use rule::{AlertRule, AlertRuleStatus, AlertRuleUpdate, NewAlertRule};
