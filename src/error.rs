//! Error types for the metrics and alerting engine.

use thiserror::Error;

/// Result type alias for metrics operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for metrics operations
#[derive(Debug, Error)]
pub enum Error {
    /// Metric name does not match the dotted naming pattern
    #[error("Invalid metric name: {0}")]
    InvalidMetricName(String),

    /// Value rejected by the metric's semantics (NaN, negative counter delta, ...)
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Malformed query
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Storage failure (allocation, capacity)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Alert rule not found
    #[error("Alert rule not found: {0}")]
    RuleNotFound(String),

    /// Alert rule definition rejected
    #[error("Invalid alert rule: {0}")]
    InvalidRule(String),

    /// Notification channel delivery failure
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration source error
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),
}

impl Error {
    /// 呼び出し側の入力に起因するエラーかどうか
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidMetricName(_)
                | Error::InvalidValue(_)
                | Error::InvalidQuery(_)
                | Error::InvalidRule(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidMetricName("Bad.Name".to_string());
        assert!(err.to_string().contains("Bad.Name"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_storage_error_is_not_validation() {
        let err = Error::Storage("allocation failed".to_string());
        assert!(!err.is_validation());
    }
}
