//! Anomaly detection for host metrics
//!
//! This module provides:
//! - Rolling per-metric baselines (mean, stddev, exponential smoothing, trend)
//! - Rule checks for CPU spikes, load, memory leaks, connection floods and DDoS
//! - The durable alert record written for every detected anomaly

mod alert;
mod baseline;
mod detector;
mod trend;

pub use alert::AlertRecord;
pub use baseline::{
    Baseline, BaselineMetric, BaselineSet, BaselineStats, Prediction, PredictionFactors,
    Seasonality, Trend, MIN_SAMPLES_FOR_VERDICT,
};
pub use detector::{AnomalyDetector, RecentHistory};
pub use trend::{linear_regression_slope, mean};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a detected anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    CpuSpike,
    HighLoad,
    MemoryLeak,
    ConnectionFlood,
    PotentialDdos,
    HighCpuProcess,
    DiskFilling,
    GenericMlAnomaly,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::CpuSpike => "cpu_spike",
            AnomalyKind::HighLoad => "high_load",
            AnomalyKind::MemoryLeak => "memory_leak",
            AnomalyKind::ConnectionFlood => "connection_flood",
            AnomalyKind::PotentialDdos => "potential_ddos",
            AnomalyKind::HighCpuProcess => "high_cpu_process",
            AnomalyKind::DiskFilling => "disk_filling",
            AnomalyKind::GenericMlAnomaly => "generic_ml_anomaly",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity levels
///
/// Rule checks use `Warning`/`Critical`; baseline verdicts use
/// `Low`/`Medium`/`High` derived from their confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Warning,
    Critical,
}

impl Severity {
    /// Bucket a baseline confidence score
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.7 {
            Severity::High
        } else if confidence > 0.4 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Ordering across both scales, for summaries and filtering
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::Warning => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured metrics attached to an anomaly
///
/// `actual` is always set; the other fields depend on the check that fired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyMetrics {
    pub actual: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_slope: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_ips: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<String>,
}

/// A detected deviation from expected host behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    /// 0.0-1.0; rule checks report 1.0
    pub confidence: f64,
    pub message: String,
    /// Baseline that produced a statistical verdict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<BaselineMetric>,
    pub metrics: AnomalyMetrics,
}

impl Anomaly {
    /// Anomaly raised by a deterministic rule
    pub fn rule(
        kind: AnomalyKind,
        severity: Severity,
        message: impl Into<String>,
        metrics: AnomalyMetrics,
    ) -> Self {
        Self {
            kind,
            severity,
            confidence: 1.0,
            message: message.into(),
            metric: None,
            metrics,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_confidence() {
        assert_eq!(Severity::from_confidence(0.9), Severity::High);
        assert_eq!(Severity::from_confidence(0.71), Severity::High);
        assert_eq!(Severity::from_confidence(0.7), Severity::Medium);
        assert_eq!(Severity::from_confidence(0.5), Severity::Medium);
        assert_eq!(Severity::from_confidence(0.4), Severity::Low);
        assert_eq!(Severity::from_confidence(0.0), Severity::Low);
    }

    #[test]
    fn test_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&AnomalyKind::PotentialDdos).unwrap();
        assert_eq!(json, "\"potential_ddos\"");
        assert_eq!(AnomalyKind::GenericMlAnomaly.to_string(), "generic_ml_anomaly");
    }

    #[test]
    fn test_anomaly_uses_type_field() {
        let anomaly = Anomaly::rule(
            AnomalyKind::CpuSpike,
            Severity::Critical,
            "CPU spike detected",
            AnomalyMetrics {
                actual: 92.0,
                ..Default::default()
            },
        );
        let value = serde_json::to_value(&anomaly).unwrap();
        assert_eq!(value["type"], "cpu_spike");
        assert_eq!(value["severity"], "critical");
        assert!(value.get("metric").is_none());
        assert!(anomaly.is_critical());
    }
}
