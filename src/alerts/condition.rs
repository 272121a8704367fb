//! Alert Condition Types

use crate::config::duration_ms_opt;
use crate::error::{Error, Result};
use crate::metrics::AggregationType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 比較演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Comparison {
    /// 比較を評価
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::LessThan => value < threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Equal => (value - threshold).abs() < f64::EPSILON,
            Comparison::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::GreaterOrEqual => ">=",
            Comparison::LessThan => "<",
            Comparison::LessOrEqual => "<=",
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Comparison {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            ">" | "gt" => Ok(Comparison::GreaterThan),
            ">=" | "gte" => Ok(Comparison::GreaterOrEqual),
            "<" | "lt" => Ok(Comparison::LessThan),
            "<=" | "lte" => Ok(Comparison::LessOrEqual),
            "==" | "=" | "eq" => Ok(Comparison::Equal),
            "!=" | "ne" => Ok(Comparison::NotEqual),
            other => Err(Error::InvalidRule(format!("unknown operator: {}", other))),
        }
    }
}

/// アラート条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    /// 比較演算子
    pub operator: Comparison,
    /// 閾値
    pub threshold: f64,
    /// 条件が継続すべき時間（ms）
    #[serde(default, with = "duration_ms_opt", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    /// 指定時は現在値ではなく集計値を評価する
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationType>,
    /// 集計対象の期間（ms）
    #[serde(default, with = "duration_ms_opt", skip_serializing_if = "Option::is_none")]
    pub time_window: Option<Duration>,
}

impl AlertCondition {
    /// 現在値に対する閾値条件
    pub fn new(operator: Comparison, threshold: f64) -> Self {
        Self {
            operator,
            threshold,
            duration: None,
            aggregation: None,
            time_window: None,
        }
    }

    /// 集計値で評価する
    pub fn aggregated(mut self, aggregation: AggregationType, time_window: Duration) -> Self {
        self.aggregation = Some(aggregation);
        self.time_window = Some(time_window);
        self
    }

    /// 条件が `duration` の間継続したときだけ発火する
    pub fn sustained_for(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn is_met(&self, value: f64) -> bool {
        self.operator.evaluate(value, self.threshold)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() {
            return Err(Error::InvalidRule(format!(
                "threshold must be finite: {}",
                self.threshold
            )));
        }
        if self.time_window.is_some_and(|w| w.is_zero()) {
            return Err(Error::InvalidRule("time window must be positive".to_string()));
        }
        if self.time_window.is_some() && self.aggregation.is_none() {
            return Err(Error::InvalidRule(
                "time window requires an aggregation".to_string(),
            ));
        }
        Ok(())
    }
}

/// アラートの重大度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_evaluate() {
        assert!(Comparison::GreaterThan.evaluate(10.0, 5.0));
        assert!(!Comparison::GreaterThan.evaluate(5.0, 5.0));
        assert!(Comparison::GreaterOrEqual.evaluate(5.0, 5.0));
        assert!(Comparison::LessThan.evaluate(5.0, 10.0));
        assert!(Comparison::LessOrEqual.evaluate(10.0, 10.0));
        assert!(Comparison::Equal.evaluate(3.0, 3.0));
        assert!(Comparison::NotEqual.evaluate(3.0, 4.0));
    }

    #[test]
    fn test_comparison_serde_symbols() {
        let json = serde_json::to_string(&Comparison::GreaterOrEqual).unwrap();
        assert_eq!(json, "\">=\"");

        let parsed: Comparison = serde_json::from_str("\"!=\"").unwrap();
        assert_eq!(parsed, Comparison::NotEqual);
        assert_eq!("<".parse::<Comparison>().unwrap(), Comparison::LessThan);
        assert!("=>".parse::<Comparison>().is_err());
    }

    #[test]
    fn test_condition_from_json() {
        let condition: AlertCondition = serde_json::from_str(
            r#"{"operator": ">", "threshold": 1000, "aggregation": "p95", "time_window": 300000}"#,
        )
        .unwrap();

        assert_eq!(condition.aggregation, Some(AggregationType::P95));
        assert_eq!(condition.time_window, Some(Duration::from_secs(300)));
        assert!(condition.duration.is_none());
        assert!(condition.validate().is_ok());
    }

    #[test]
    fn test_condition_validation() {
        assert!(AlertCondition::new(Comparison::GreaterThan, f64::NAN)
            .validate()
            .is_err());

        let mut condition = AlertCondition::new(Comparison::LessThan, 1.0);
        condition.time_window = Some(Duration::from_secs(60));
        assert!(condition.validate().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::Warning);
        assert_eq!(
            serde_json::to_string(&AlertSeverity::Warning).unwrap(),
            "\"warning\""
        );
    }
}
