//! Observability infrastructure for the monitoring agent
//!
//! Provides:
//! - Prometheus metrics (collection latency, samples, anomalies, actions, mode)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

use crate::anomaly::Anomaly;

/// Histogram buckets for host collection latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    collection_latency_seconds: Histogram,
    samples_collected: IntCounter,
    collection_warnings: IntCounter,
    anomalies_detected: IntCounterVec,
    actions_executed: IntCounterVec,
    persistence_errors: IntCounter,
    tick_failures: IntCounter,
    critical_mode: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            collection_latency_seconds: register_histogram!(
                "hostwatch_collection_latency_seconds",
                "Time spent collecting a host sample",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            samples_collected: register_int_counter!(
                "hostwatch_samples_collected_total",
                "Total number of host samples collected"
            )
            .expect("Failed to register samples_collected"),

            collection_warnings: register_int_counter!(
                "hostwatch_collection_warnings_total",
                "Total number of collection sub-queries that fell back to defaults"
            )
            .expect("Failed to register collection_warnings"),

            anomalies_detected: register_int_counter_vec!(
                "hostwatch_anomalies_detected_total",
                "Total number of anomalies detected",
                &["type", "severity"]
            )
            .expect("Failed to register anomalies_detected"),

            actions_executed: register_int_counter_vec!(
                "hostwatch_actions_executed_total",
                "Total number of remediation actions run, by outcome",
                &["action", "outcome"]
            )
            .expect("Failed to register actions_executed"),

            persistence_errors: register_int_counter!(
                "hostwatch_persistence_errors_total",
                "Total number of failed alert, report or error log writes"
            )
            .expect("Failed to register persistence_errors"),

            tick_failures: register_int_counter!(
                "hostwatch_tick_failures_total",
                "Total number of sampling ticks, health checks and reports that failed or panicked"
            )
            .expect("Failed to register tick_failures"),

            critical_mode: register_int_gauge!(
                "hostwatch_critical_mode",
                "1 while the agent samples at the critical interval"
            )
            .expect("Failed to register critical_mode"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner().collection_latency_seconds.observe(duration_secs);
    }

    /// Count a collected sample and its degraded sub-queries
    pub fn record_sample(&self, warnings: usize) {
        self.inner().samples_collected.inc();
        self.inner().collection_warnings.inc_by(warnings as u64);
    }

    pub fn inc_anomaly(&self, anomaly_type: &str, severity: &str) {
        self.inner()
            .anomalies_detected
            .with_label_values(&[anomaly_type, severity])
            .inc();
    }

    pub fn inc_action(&self, action: &str, outcome: &str) {
        self.inner()
            .actions_executed
            .with_label_values(&[action, outcome])
            .inc();
    }

    pub fn inc_persistence_errors(&self) {
        self.inner().persistence_errors.inc();
    }

    pub fn inc_tick_failures(&self) {
        self.inner().tick_failures.inc();
    }

    pub fn set_critical_mode(&self, critical: bool) {
        self.inner().critical_mode.set(i64::from(critical));
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted logging for anomalies, remediation
/// and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log an anomaly detection event
    pub fn log_anomaly(&self, anomaly: &Anomaly) {
        if anomaly.is_critical() {
            warn!(
                event = "anomaly_detected",
                node = %self.node_name,
                anomaly_type = %anomaly.kind,
                severity = %anomaly.severity,
                confidence = anomaly.confidence,
                actual = anomaly.metrics.actual,
                details = %anomaly.message,
                "Critical anomaly detected"
            );
        } else {
            info!(
                event = "anomaly_detected",
                node = %self.node_name,
                anomaly_type = %anomaly.kind,
                severity = %anomaly.severity,
                confidence = anomaly.confidence,
                actual = anomaly.metrics.actual,
                details = %anomaly.message,
                "Anomaly detected"
            );
        }
    }

    /// Log a remediation action result
    pub fn log_action(&self, anomaly_type: &str, action: &str, status: &str, detail: &str) {
        if status == "failed" {
            warn!(
                event = "action_failed",
                node = %self.node_name,
                anomaly_type = %anomaly_type,
                action = %action,
                error = %detail,
                "Remediation action failed, continuing with next action"
            );
        } else {
            info!(
                event = "action_executed",
                node = %self.node_name,
                anomaly_type = %anomaly_type,
                action = %action,
                status = %status,
                detail = %detail,
                "Remediation action executed"
            );
        }
    }

    /// Log a switch between sampling modes
    pub fn log_mode_change(&self, from: &str, to: &str, interval_ms: u128) {
        warn!(
            event = "mode_changed",
            node = %self.node_name,
            from = %from,
            to = %to,
            interval_ms = interval_ms as u64,
            "Sampling mode changed"
        );
    }

    /// One-line health summary logged after each sampling tick
    pub fn log_health_summary(
        &self,
        mode: &str,
        cpu_percent: f64,
        memory_percent: f64,
        disk_percent: f64,
        connections: usize,
        anomalies: usize,
    ) {
        info!(
            event = "health_summary",
            node = %self.node_name,
            mode = %mode,
            cpu_percent = cpu_percent,
            memory_percent = memory_percent,
            disk_percent = disk_percent,
            connections = connections,
            anomalies = anomalies,
            "Sampling tick complete"
        );
    }

    /// Log a failed write to one of the stores
    pub fn log_persistence_error(&self, store: &str, error: &str) {
        error!(
            event = "persistence_failed",
            node = %self.node_name,
            store = %store,
            error = %error,
            "Failed to persist record"
        );
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, data_dir: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            data_dir = %data_dir,
            "Host monitoring agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Host monitoring agent shutting down"
        );
    }
}
