//! Rule-based anomaly checks
//!
//! Complements the statistical baselines with deterministic checks against a
//! short in-memory history of the last few ticks. Checks needing an average
//! of the last N ticks are skipped until N ticks have been recorded.

use std::collections::VecDeque;

use super::trend::{linear_regression_slope, mean};
use super::{Anomaly, AnomalyKind, AnomalyMetrics, BaselineSet, Severity};
use crate::config::{DetectionSettings, Thresholds};
use crate::models::MetricSample;

/// Ticks averaged for CPU and connection comparisons
const SHORT_WINDOW: usize = 5;

/// Ticks fitted for the memory trend
const LEAK_WINDOW: usize = 10;

const CPU_SPIKE_FACTOR: f64 = 1.5;

/// Load per core above which the host counts as overloaded
const LOAD_PER_CORE_LIMIT: f64 = 2.0;

/// Memory growth in percentage points per tick
const LEAK_SLOPE_LIMIT: f64 = 2.0;

const FLOOD_FACTOR: f64 = 3.0;
const FLOOD_MIN_CONNECTIONS: f64 = 100.0;

const DDOS_MIN_UNIQUE_IPS: usize = 50;
const DDOS_CONNECTIONS_PER_IP: usize = 5;

/// Last few ticks of the values the rule checks compare against
#[derive(Debug, Clone)]
pub struct RecentHistory {
    capacity: usize,
    cpu: VecDeque<f64>,
    memory: VecDeque<f64>,
    connections: VecDeque<f64>,
}

impl RecentHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(LEAK_WINDOW);
        Self {
            capacity,
            cpu: VecDeque::with_capacity(capacity),
            memory: VecDeque::with_capacity(capacity),
            connections: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, sample: &MetricSample) {
        push_bounded(&mut self.cpu, sample.cpu.usage_percent, self.capacity);
        push_bounded(&mut self.memory, sample.memory.usage_percent, self.capacity);
        push_bounded(
            &mut self.connections,
            sample.connections.established_count as f64,
            self.capacity,
        );
    }

    pub fn len(&self) -> usize {
        self.cpu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty()
    }
}

fn push_bounded(buf: &mut VecDeque<f64>, value: f64, capacity: usize) {
    while buf.len() >= capacity {
        buf.pop_front();
    }
    buf.push_back(value);
}

/// The last `n` values, or `None` if fewer have been recorded
fn last_n(buf: &VecDeque<f64>, n: usize) -> Option<Vec<f64>> {
    if buf.len() < n {
        return None;
    }
    Some(buf.iter().skip(buf.len() - n).copied().collect())
}

/// Runs every rule check plus the baseline verdicts for a sample
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    thresholds: Thresholds,
    process_cpu_threshold: f64,
    history: RecentHistory,
}

impl AnomalyDetector {
    pub fn new(thresholds: Thresholds, settings: &DetectionSettings) -> Self {
        Self {
            thresholds,
            process_cpu_threshold: settings.process_cpu_threshold,
            history: RecentHistory::new(settings.recent_window),
        }
    }

    pub fn history(&self) -> &RecentHistory {
        &self.history
    }

    /// Remember a sample for future comparisons
    ///
    /// Call after [`analyze`](Self::analyze) so a sample is never compared
    /// against itself.
    pub fn record(&mut self, sample: &MetricSample) {
        self.history.record(sample);
    }

    /// Every anomaly the sample exhibits; checks are independent
    pub fn analyze(&self, sample: &MetricSample, baselines: &BaselineSet) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        anomalies.extend(self.check_cpu(sample));
        anomalies.extend(self.check_memory(sample));
        anomalies.extend(self.check_connection_flood(sample));
        anomalies.extend(self.check_ddos(sample));
        anomalies.extend(self.check_processes(sample));
        anomalies.extend(self.check_disks(sample));
        anomalies.extend(baselines.detect(sample));

        anomalies
    }

    /// Spike against the recent average, otherwise sustained load
    fn check_cpu(&self, sample: &MetricSample) -> Option<Anomaly> {
        let usage = sample.cpu.usage_percent;

        if let Some(recent) = last_n(&self.history.cpu, SHORT_WINDOW) {
            let average = mean(&recent);
            if usage > average * CPU_SPIKE_FACTOR && usage > self.thresholds.cpu.warning {
                let severity = if usage > self.thresholds.cpu.critical {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                return Some(Anomaly::rule(
                    AnomalyKind::CpuSpike,
                    severity,
                    format!("CPU spike detected: {usage:.1}% (avg: {average:.1}%)"),
                    AnomalyMetrics {
                        actual: usage,
                        expected: Some(average),
                        ..Default::default()
                    },
                ));
            }
        }

        let load = sample.cpu.load_average[0];
        let cores = sample.cpu.cores;
        if load > cores as f64 * LOAD_PER_CORE_LIMIT {
            return Some(Anomaly::rule(
                AnomalyKind::HighLoad,
                Severity::Warning,
                format!("High system load: {load:.2} (cores: {cores})"),
                AnomalyMetrics {
                    actual: load,
                    expected: Some(cores as f64),
                    ..Default::default()
                },
            ));
        }

        None
    }

    fn check_memory(&self, sample: &MetricSample) -> Option<Anomaly> {
        let usage = sample.memory.usage_percent;
        let recent = last_n(&self.history.memory, LEAK_WINDOW)?;
        let slope = linear_regression_slope(&recent);

        if slope >= LEAK_SLOPE_LIMIT && usage > self.thresholds.memory.warning {
            return Some(Anomaly::rule(
                AnomalyKind::MemoryLeak,
                Severity::Warning,
                format!("Potential memory leak detected: {usage:.1}% (trend: +{slope:.1}%)"),
                AnomalyMetrics {
                    actual: usage,
                    trend_slope: Some(slope),
                    ..Default::default()
                },
            ));
        }

        None
    }

    fn check_connection_flood(&self, sample: &MetricSample) -> Option<Anomaly> {
        let count = sample.connections.established_count as f64;
        let recent = last_n(&self.history.connections, SHORT_WINDOW)?;
        let average = mean(&recent);

        if count > average * FLOOD_FACTOR && count > FLOOD_MIN_CONNECTIONS {
            return Some(Anomaly::rule(
                AnomalyKind::ConnectionFlood,
                Severity::Warning,
                format!("Unusual connection count: {count} (avg: {average:.0})"),
                AnomalyMetrics {
                    actual: count,
                    expected: Some(average),
                    unique_ips: Some(sample.connections.unique_remote_ips.len()),
                    ..Default::default()
                },
            ));
        }

        None
    }

    fn check_ddos(&self, sample: &MetricSample) -> Option<Anomaly> {
        let count = sample.connections.established_count;
        let unique_ips = sample.connections.unique_remote_ips.len();

        if unique_ips > DDOS_MIN_UNIQUE_IPS && count > unique_ips * DDOS_CONNECTIONS_PER_IP {
            return Some(Anomaly::rule(
                AnomalyKind::PotentialDdos,
                Severity::Critical,
                format!("Potential DDoS detected: {unique_ips} unique IPs, {count} connections"),
                AnomalyMetrics {
                    actual: count as f64,
                    unique_ips: Some(unique_ips),
                    ..Default::default()
                },
            ));
        }

        None
    }

    fn check_processes(&self, sample: &MetricSample) -> Option<Anomaly> {
        let offenders: Vec<_> = sample
            .processes
            .top_by_cpu
            .iter()
            .filter(|p| p.cpu_percent > self.process_cpu_threshold)
            .collect();

        if offenders.is_empty() {
            return None;
        }

        let hottest = offenders.iter().map(|p| p.cpu_percent).fold(0.0, f64::max);
        let described: Vec<String> = offenders
            .iter()
            .map(|p| format!("{} ({:.1}%)", p.command, p.cpu_percent))
            .collect();

        Some(Anomaly::rule(
            AnomalyKind::HighCpuProcess,
            Severity::Warning,
            format!("High CPU processes detected: {}", described.join(", ")),
            AnomalyMetrics {
                actual: hottest,
                processes: offenders.iter().map(|p| p.command.clone()).collect(),
                ..Default::default()
            },
        ))
    }

    fn check_disks(&self, sample: &MetricSample) -> Option<Anomaly> {
        let fullest = sample
            .disk
            .iter()
            .filter(|d| d.usage_percent > self.thresholds.disk.warning)
            .max_by(|a, b| a.usage_percent.total_cmp(&b.usage_percent))?;

        let severity = if fullest.usage_percent > self.thresholds.disk.critical {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Some(Anomaly::rule(
            AnomalyKind::DiskFilling,
            severity,
            format!(
                "Disk {} is {:.1}% full ({} bytes available)",
                fullest.mount_point, fullest.usage_percent, fullest.available_bytes
            ),
            AnomalyMetrics {
                actual: fullest.usage_percent,
                expected: Some(self.thresholds.disk.warning),
                ..Default::default()
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fixtures, ProcessInfo};

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(Thresholds::default(), &DetectionSettings::default())
    }

    fn baselines() -> BaselineSet {
        BaselineSet::new(&DetectionSettings::default())
    }

    fn kinds(anomalies: &[Anomaly]) -> Vec<AnomalyKind> {
        anomalies.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn test_cpu_spike_over_recent_average() {
        let mut detector = detector();
        for usage in [45.0, 46.0, 44.0, 45.0, 47.0] {
            detector.record(&fixtures::with_cpu(usage));
        }

        let anomalies = detector.analyze(&fixtures::with_cpu(92.0), &baselines());
        let spike = anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::CpuSpike)
            .expect("cpu spike");
        assert_eq!(spike.severity, Severity::Critical);
        assert!((spike.metrics.expected.unwrap() - 45.4).abs() < 1e-9);
        assert_eq!(spike.metrics.actual, 92.0);
    }

    #[test]
    fn test_cpu_spike_warning_below_critical() {
        let mut detector = detector();
        for _ in 0..5 {
            detector.record(&fixtures::with_cpu(40.0));
        }
        let anomalies = detector.analyze(&fixtures::with_cpu(75.0), &baselines());
        let spike = anomalies.iter().find(|a| a.kind == AnomalyKind::CpuSpike).unwrap();
        assert_eq!(spike.severity, Severity::Warning);
    }

    #[test]
    fn test_cpu_spike_needs_history() {
        let mut detector = detector();
        for _ in 0..4 {
            detector.record(&fixtures::with_cpu(10.0));
        }
        let anomalies = detector.analyze(&fixtures::with_cpu(95.0), &baselines());
        assert!(!kinds(&anomalies).contains(&AnomalyKind::CpuSpike));
    }

    #[test]
    fn test_high_load_when_no_spike() {
        let detector = detector();
        let mut sample = fixtures::sample();
        sample.cpu.load_average = [9.0, 4.0, 2.0];

        let anomalies = detector.analyze(&sample, &baselines());
        assert_eq!(kinds(&anomalies), vec![AnomalyKind::HighLoad]);
        assert_eq!(anomalies[0].severity, Severity::Warning);
    }

    #[test]
    fn test_memory_leak_on_steady_growth() {
        let mut detector = detector();
        for usage in (0..=10).map(|i| 70.0 + 2.0 * i as f64) {
            detector.record(&fixtures::with_memory(usage));
        }

        let anomalies = detector.analyze(&fixtures::with_memory(92.0), &baselines());
        let leak = anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::MemoryLeak)
            .expect("memory leak");
        assert_eq!(leak.severity, Severity::Warning);
        assert_eq!(leak.metrics.trend_slope, Some(2.0));
    }

    #[test]
    fn test_memory_growth_below_warning_is_quiet() {
        let mut detector = detector();
        for usage in (0..10).map(|i| 40.0 + 3.0 * i as f64) {
            detector.record(&fixtures::with_memory(usage));
        }
        let anomalies = detector.analyze(&fixtures::with_memory(70.0), &baselines());
        assert!(!kinds(&anomalies).contains(&AnomalyKind::MemoryLeak));
    }

    #[test]
    fn test_flood_and_ddos_fire_together() {
        let mut detector = detector();
        for _ in 0..5 {
            detector.record(&fixtures::with_connections(50, 20));
        }

        let anomalies = detector.analyze(&fixtures::with_connections(400, 60), &baselines());
        let found = kinds(&anomalies);
        assert!(found.contains(&AnomalyKind::ConnectionFlood));
        assert!(found.contains(&AnomalyKind::PotentialDdos));

        let ddos = anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::PotentialDdos)
            .unwrap();
        assert_eq!(ddos.severity, Severity::Critical);
        assert_eq!(ddos.metrics.unique_ips, Some(60));
    }

    #[test]
    fn test_ddos_without_history() {
        let detector = detector();
        let anomalies = detector.analyze(&fixtures::with_connections(400, 60), &baselines());
        assert_eq!(kinds(&anomalies), vec![AnomalyKind::PotentialDdos]);
    }

    #[test]
    fn test_high_cpu_process_names_commands() {
        let detector = detector();
        let mut sample = fixtures::sample();
        sample.processes.top_by_cpu = vec![
            ProcessInfo {
                pid: 100,
                command: "miner".to_string(),
                cpu_percent: 97.5,
                memory_bytes: 1024,
            },
            ProcessInfo {
                pid: 101,
                command: "sshd".to_string(),
                cpu_percent: 0.3,
                memory_bytes: 1024,
            },
        ];

        let anomalies = detector.analyze(&sample, &baselines());
        assert_eq!(kinds(&anomalies), vec![AnomalyKind::HighCpuProcess]);
        assert_eq!(anomalies[0].metrics.processes, vec!["miner".to_string()]);
        assert!(anomalies[0].message.contains("miner (97.5%)"));
    }

    #[test]
    fn test_disk_filling_severity() {
        let detector = detector();

        let warning = detector.analyze(&fixtures::with_disk(88.0), &baselines());
        assert_eq!(kinds(&warning), vec![AnomalyKind::DiskFilling]);
        assert_eq!(warning[0].severity, Severity::Warning);

        let critical = detector.analyze(&fixtures::with_disk(97.0), &baselines());
        assert_eq!(critical[0].severity, Severity::Critical);
    }

    #[test]
    fn test_quiet_host_has_no_anomalies() {
        let mut detector = detector();
        for _ in 0..10 {
            detector.record(&fixtures::sample());
        }
        assert!(detector.analyze(&fixtures::sample(), &baselines()).is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut detector = detector();
        for _ in 0..25 {
            detector.record(&fixtures::sample());
        }
        assert_eq!(detector.history().len(), 10);
    }
}
