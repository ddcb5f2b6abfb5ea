//! Monitor configuration
//!
//! Loaded from a JSON file at startup. Missing keys fall back to defaults,
//! and a missing file is created with the defaults so operators can edit it.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Top-level monitor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    pub monitoring: MonitoringSettings,
    pub thresholds: Thresholds,
    pub alerts: AlertSettings,
    pub detection: DetectionSettings,
    pub response: ResponseSettings,
    pub connectivity: ConnectivitySettings,
}

/// Polling cadence, all values in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringSettings {
    /// Sampling period in normal mode
    pub interval: u64,
    /// Sampling period in critical mode
    pub fast_interval: u64,
    pub report_interval: u64,
    pub health_check_interval: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            interval: 10_000,
            fast_interval: 2_000,
            report_interval: 300_000,
            health_check_interval: 30_000,
        }
    }
}

impl MonitoringSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval)
    }
}

/// Warning/critical pair for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

impl ThresholdPair {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

/// Per-metric threshold pairs
///
/// A pair given only partly in the file keeps that metric's default for
/// the missing side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ThresholdOverrides")]
pub struct Thresholds {
    pub cpu: ThresholdPair,
    pub memory: ThresholdPair,
    pub disk: ThresholdPair,
    pub connections: ThresholdPair,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: ThresholdPair::new(70.0, 90.0),
            memory: ThresholdPair::new(80.0, 95.0),
            disk: ThresholdPair::new(85.0, 95.0),
            connections: ThresholdPair::new(200.0, 500.0),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PairOverride {
    warning: Option<f64>,
    critical: Option<f64>,
}

impl PairOverride {
    fn or(self, default: ThresholdPair) -> ThresholdPair {
        ThresholdPair {
            warning: self.warning.unwrap_or(default.warning),
            critical: self.critical.unwrap_or(default.critical),
        }
    }
}

/// Threshold section as written in the file, every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThresholdOverrides {
    cpu: PairOverride,
    memory: PairOverride,
    disk: PairOverride,
    connections: PairOverride,
}

impl From<ThresholdOverrides> for Thresholds {
    fn from(file: ThresholdOverrides) -> Self {
        let defaults = Thresholds::default();
        Self {
            cpu: file.cpu.or(defaults.cpu),
            memory: file.memory.or(defaults.memory),
            disk: file.disk.or(defaults.disk),
            connections: file.connections.or(defaults.connections),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertSettings {
    pub enabled: bool,
    pub log_to_file: bool,
    pub log_to_console: bool,
    pub webhook_url: Option<String>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            log_to_file: true,
            log_to_console: true,
            webhook_url: None,
        }
    }
}

/// Knobs for the statistical and rule-based detectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionSettings {
    /// Points retained per baseline
    pub baseline_capacity: usize,
    /// Most recent points used for mean/stddev/min/max
    pub stats_window: usize,
    /// Points required before baseline verdicts are reported
    pub min_training_size: usize,
    /// Ticks kept for the rule layer's recent averages
    pub recent_window: usize,
    /// Per-process CPU percentage that flags a process
    pub process_cpu_threshold: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            baseline_capacity: 1000,
            stats_window: 50,
            min_training_size: 100,
            recent_window: 10,
            process_cpu_threshold: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseSettings {
    pub enabled: bool,
    /// Log intended actions without touching the host
    pub dry_run: bool,
    /// Wait after each action before re-checking the anomaly
    pub settle_delay_ms: u64,
    /// Upper bound for any OS query or subprocess
    pub command_timeout_ms: u64,
    pub temp_dirs: Vec<String>,
    pub temp_file_max_age_days: u64,
}

impl Default for ResponseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: false,
            settle_delay_ms: 2_000,
            command_timeout_ms: 5_000,
            temp_dirs: vec!["/tmp".to_string(), "/var/tmp".to_string()],
            temp_file_max_age_days: 7,
        }
    }
}

impl ResponseSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectivitySettings {
    pub hosts: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            hosts: vec![
                "8.8.8.8".to_string(),
                "google.com".to_string(),
                "github.com".to_string(),
            ],
            timeout_ms: 5_000,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `path`, writing defaults there if it does not exist
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            let defaults = Self::default();
            defaults.save(path)?;
            info!(path = %path.display(), "Default monitor configuration created");
            return Ok(defaults);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let loaded: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        loaded.validate()?;

        info!(path = %path.display(), "Monitor configuration loaded");
        Ok(loaded)
    }

    /// Persist configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        let m = &self.monitoring;
        if m.interval == 0
            || m.fast_interval == 0
            || m.report_interval == 0
            || m.health_check_interval == 0
        {
            bail!("monitoring intervals must be greater than zero");
        }

        let pairs = [
            ("cpu", self.thresholds.cpu),
            ("memory", self.thresholds.memory),
            ("disk", self.thresholds.disk),
            ("connections", self.thresholds.connections),
        ];
        for (name, pair) in pairs {
            if pair.warning >= pair.critical {
                bail!(
                    "thresholds.{name}: warning ({}) must be below critical ({})",
                    pair.warning,
                    pair.critical
                );
            }
        }

        if self.detection.stats_window == 0 || self.detection.baseline_capacity == 0 {
            bail!("detection windows must be greater than zero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.monitoring.interval, 10_000);
        assert_eq!(config.monitoring.fast_interval, 2_000);
        assert_eq!(config.monitoring.report_interval, 300_000);
        assert_eq!(config.thresholds.cpu, ThresholdPair::new(70.0, 90.0));
        assert_eq!(config.thresholds.connections, ThresholdPair::new(200.0, 500.0));
        assert!(config.alerts.enabled);
        assert!(config.alerts.webhook_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("monitor-config.json");

        let created = MonitorConfig::load_or_init(&path).unwrap();
        assert!(path.exists());

        let reloaded = MonitorConfig::load_or_init(&path).unwrap();
        assert_eq!(created, reloaded);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor-config.json");
        std::fs::write(
            &path,
            r#"{
                "monitoring": { "interval": 5000 },
                "thresholds": { "cpu": { "warning": 60, "critical": 85 } },
                "alerts": { "webhookUrl": "http://hooks.local/alert" }
            }"#,
        )
        .unwrap();

        let config = MonitorConfig::load_or_init(&path).unwrap();
        assert_eq!(config.monitoring.interval, 5000);
        assert_eq!(config.monitoring.fast_interval, 2000);
        assert_eq!(config.thresholds.cpu, ThresholdPair::new(60.0, 85.0));
        assert_eq!(config.thresholds.memory, ThresholdPair::new(80.0, 95.0));
        assert_eq!(
            config.alerts.webhook_url.as_deref(),
            Some("http://hooks.local/alert")
        );
        assert!(config.alerts.log_to_file);
    }

    #[test]
    fn test_half_threshold_pair_keeps_metric_default() {
        let config: MonitorConfig = serde_json::from_str(
            r#"{ "thresholds": { "cpu": { "warning": 60 }, "disk": { "critical": 98 } } }"#,
        )
        .unwrap();

        assert_eq!(config.thresholds.cpu, ThresholdPair::new(60.0, 90.0));
        assert_eq!(config.thresholds.disk, ThresholdPair::new(85.0, 98.0));
        assert_eq!(config.thresholds.memory, ThresholdPair::new(80.0, 95.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = MonitorConfig::default();
        config.thresholds.memory = ThresholdPair::new(95.0, 80.0);
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.monitoring.fast_interval = 0;
        assert!(config.validate().is_err());
    }
}
