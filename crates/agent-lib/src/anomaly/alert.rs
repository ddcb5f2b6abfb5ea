//! Durable alert records
//!
//! One record is written per detected anomaly and never modified afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Anomaly, AnomalyKind, AnomalyMetrics, BaselineMetric, Severity};

/// Audit-trail entry for a single anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub message: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<BaselineMetric>,
    pub metrics: AnomalyMetrics,
}

impl AlertRecord {
    pub fn from_anomaly(anomaly: &Anomaly, hostname: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            hostname: hostname.to_string(),
            kind: anomaly.kind,
            severity: anomaly.severity,
            message: anomaly.message.clone(),
            confidence: anomaly.confidence,
            metric: anomaly.metric,
            metrics: anomaly.metrics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_copies_anomaly() {
        let anomaly = Anomaly::rule(
            AnomalyKind::PotentialDdos,
            Severity::Critical,
            "Potential DDoS detected: 60 unique IPs, 400 connections",
            AnomalyMetrics {
                actual: 400.0,
                unique_ips: Some(60),
                ..Default::default()
            },
        );

        let now = Utc::now();
        let record = AlertRecord::from_anomaly(&anomaly, "web-1", now);
        assert_eq!(record.kind, anomaly.kind);
        assert_eq!(record.severity, Severity::Critical);
        assert_eq!(record.message, anomaly.message);
        assert_eq!(record.timestamp, now);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "potential_ddos");
        assert_eq!(json["metrics"]["uniqueIps"], 60);
    }
}
