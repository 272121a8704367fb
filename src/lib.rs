//! # testweb-metrics
//!
//! Embedded metrics and alerting engine for a test-automation platform.
//!
//! Producers record measurements through [`MetricsCollector`], which writes
//! into an in-memory [`TimeSeriesStore`] with bounded retention. The
//! [`AlertEngine`] periodically evaluates threshold rules against current or
//! aggregated values and delivers events to pluggable notification channels.
//!
//! ```no_run
//! use testweb_metrics::{AlertEngine, MetricsCollector, MetricsConfig, Labels};
//!
//! # async fn run() -> testweb_metrics::Result<()> {
//! let collector = MetricsCollector::new(MetricsConfig::default()).await?;
//! collector.increment("error.count", 1.0, &Labels::new()).await?;
//!
//! let engine = AlertEngine::new(collector.clone());
//! engine.add_default_rules().await?;
//! engine.start_default().await?;
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod clock;
pub mod collector;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod storage;

pub use alerts::{
    AlertCondition, AlertEngine, AlertEvent, AlertRule, AlertSeverity, Comparison,
    NewAlertRule, NotificationChannel,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{MetricsCollector, MetricsCollectorBuilder};
pub use config::{ConfigLoader, MetricsConfig};
pub use dashboard::{DashboardManager, DashboardPanel};
pub use error::{Error, Result};
pub use logging::{init_logging, LogConfig};
pub use metrics::{
    labels, AggregationType, DataPoint, Labels, MetricCategory, MetricDefinition, MetricQuery,
    MetricQueryResult, MetricRegistry, MetricType,
};
pub use storage::TimeSeriesStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::InvalidMetricName("Bad Name".to_string());
        assert!(err.to_string().contains("Bad Name"));
    }
}
