//! Periodic status reports
//!
//! A report is a full snapshot of the host: per-component metrics with their
//! threshold status, threshold breaches, recent anomalies, baseline
//! summaries, connectivity results and uptime.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::{AlertRecord, BaselineMetric, BaselineStats};
use crate::config::{ThresholdPair, Thresholds};
use crate::connectivity::ConnectivityResult;
use crate::health::MetricStatus;
use crate::models::MetricSample;
use crate::orchestrator::Mode;

/// Overall verdict of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Healthy,
    Warning,
    Critical,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Healthy => "healthy",
            SummaryStatus::Warning => "warning",
            SummaryStatus::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub status: SummaryStatus,
    pub alert_count: usize,
    pub uptime: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub hostname: String,
    pub platform: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStatus {
    pub usage: f64,
    pub status: MetricStatus,
    pub cores: usize,
    pub load_average: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStatus {
    pub usage: f64,
    pub status: MetricStatus,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskStatus {
    pub mount_point: String,
    pub usage: f64,
    pub status: MetricStatus,
    pub available_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub open_ports: usize,
    pub active_connections: usize,
    pub unique_ips: usize,
    pub status: MetricStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub cpu: CpuStatus,
    pub memory: MemoryStatus,
    pub disk: Vec<DiskStatus>,
    pub network: NetworkStatus,
}

/// A metric sitting at or above one of its thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdAlert {
    pub level: MetricStatus,
    pub component: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

impl ThresholdAlert {
    fn check(component: &str, label: &str, value: f64, pair: &ThresholdPair) -> Option<Self> {
        let level = MetricStatus::classify(value, pair);
        let threshold = match level {
            MetricStatus::Normal => return None,
            MetricStatus::Warning => pair.warning,
            MetricStatus::Critical => pair.critical,
        };

        Some(Self {
            level,
            component: component.to_string(),
            message: format!("{label} {}: {value:.1}", level.as_str()),
            value,
            threshold,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub mode: Mode,
    pub summary: ReportSummary,
    pub system: SystemInfo,
    pub performance: Performance,
    pub alerts: Vec<ThresholdAlert>,
    #[serde(default)]
    pub recent_anomalies: Vec<AlertRecord>,
    #[serde(default)]
    pub baselines: BTreeMap<BaselineMetric, BaselineStats>,
    #[serde(default)]
    pub connectivity: Vec<ConnectivityResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collection_warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_reason: Option<String>,
}

impl StatusReport {
    /// Build a report from the latest sample
    pub fn new(sample: &MetricSample, thresholds: &Thresholds, mode: Mode) -> Self {
        let performance = Performance {
            cpu: CpuStatus {
                usage: sample.cpu.usage_percent,
                status: MetricStatus::classify(sample.cpu.usage_percent, &thresholds.cpu),
                cores: sample.cpu.cores,
                load_average: sample.cpu.load_average,
            },
            memory: MemoryStatus {
                usage: sample.memory.usage_percent,
                status: MetricStatus::classify(sample.memory.usage_percent, &thresholds.memory),
                total_bytes: sample.memory.total_bytes,
                free_bytes: sample.memory.free_bytes,
            },
            disk: sample
                .disk
                .iter()
                .map(|d| DiskStatus {
                    mount_point: d.mount_point.clone(),
                    usage: d.usage_percent,
                    status: MetricStatus::classify(d.usage_percent, &thresholds.disk),
                    available_bytes: d.available_bytes,
                })
                .collect(),
            network: NetworkStatus {
                open_ports: sample.ports.open_count,
                active_connections: sample.connections.established_count,
                unique_ips: sample.connections.unique_remote_ips.len(),
                status: MetricStatus::classify(
                    sample.connections.established_count as f64,
                    &thresholds.connections,
                ),
            },
        };

        let alerts = threshold_alerts(sample, thresholds);
        let uptime = format_uptime(sample.uptime_secs);

        Self {
            timestamp: Utc::now(),
            mode,
            summary: ReportSummary {
                status: summarize(&alerts),
                alert_count: alerts.len(),
                uptime,
            },
            system: SystemInfo {
                hostname: sample.hostname.clone(),
                platform: sample.platform.clone(),
                uptime_secs: sample.uptime_secs,
            },
            performance,
            alerts,
            recent_anomalies: Vec::new(),
            baselines: BTreeMap::new(),
            connectivity: Vec::new(),
            collection_warnings: sample.collection_warnings.clone(),
            shutdown_reason: None,
        }
    }

    pub fn with_recent_anomalies(mut self, records: Vec<AlertRecord>) -> Self {
        self.recent_anomalies = records;
        self
    }

    pub fn with_baselines(mut self, baselines: BTreeMap<BaselineMetric, BaselineStats>) -> Self {
        self.baselines = baselines;
        self
    }

    pub fn with_connectivity(mut self, results: Vec<ConnectivityResult>) -> Self {
        self.connectivity = results;
        self
    }

    pub fn with_shutdown_reason(mut self, reason: impl Into<String>) -> Self {
        self.shutdown_reason = Some(reason.into());
        self
    }

    /// One-line digest for the console
    pub fn summary_line(&self) -> String {
        let worst_disk = self
            .performance
            .disk
            .iter()
            .map(|d| d.usage)
            .fold(0.0, f64::max);

        format!(
            "[{}] mode={} cpu={:.1}% memory={:.1}% disk={:.1}% connections={} alerts={} uptime={}",
            self.summary.status.as_str(),
            self.mode,
            self.performance.cpu.usage,
            self.performance.memory.usage,
            worst_disk,
            self.performance.network.active_connections,
            self.summary.alert_count,
            self.summary.uptime
        )
    }
}

fn threshold_alerts(sample: &MetricSample, thresholds: &Thresholds) -> Vec<ThresholdAlert> {
    let mut alerts = Vec::new();

    alerts.extend(ThresholdAlert::check(
        "cpu",
        "CPU usage",
        sample.cpu.usage_percent,
        &thresholds.cpu,
    ));
    alerts.extend(ThresholdAlert::check(
        "memory",
        "Memory usage",
        sample.memory.usage_percent,
        &thresholds.memory,
    ));
    for disk in &sample.disk {
        alerts.extend(ThresholdAlert::check(
            "disk",
            &format!("Disk usage on {}", disk.mount_point),
            disk.usage_percent,
            &thresholds.disk,
        ));
    }
    alerts.extend(ThresholdAlert::check(
        "connections",
        "Established connections",
        sample.connections.established_count as f64,
        &thresholds.connections,
    ));

    alerts
}

fn summarize(alerts: &[ThresholdAlert]) -> SummaryStatus {
    match alerts.iter().map(|a| a.level).max() {
        Some(MetricStatus::Critical) => SummaryStatus::Critical,
        Some(MetricStatus::Warning) => SummaryStatus::Warning,
        _ => SummaryStatus::Healthy,
    }
}

/// Render seconds as `"{d}d {h}h {m}m"`
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    format!("{days}d {hours}h {minutes}m")
}
