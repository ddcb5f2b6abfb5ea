//! Monitoring orchestration
//!
//! Three schedules drive the agent, each on its own task:
//! - the sampling loop (collect, detect, respond, persist), whose period
//!   depends on the current [`Mode`]
//! - the health check, which decides the mode
//! - the status report timer
//!
//! A mode change signals the running sampling loop to stop and starts a
//! replacement at the new period. The replacement waits for the old loop's
//! in-flight tick before its first tick, so sampling never overlaps and the
//! timers never wait on a tick. Every tick, check and report runs as its own
//! task so a panic is logged and its schedule keeps going.

mod mode;


pub use mode::Mode;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::anomaly::{AlertRecord, AnomalyDetector, BaselineSet};
use crate::collector::MetricsCollector;
use crate::config::MonitorConfig;
use crate::connectivity::probe_hosts;
use crate::health::{components, HealthAssessment, HealthRegistry};
use crate::models::MetricSample;
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::report::{format_uptime, StatusReport};
use crate::response::ResponseExecutor;
use crate::storage::{AlertQuery, AlertStore, DataDir, ErrorLog, ReportStore};

/// Anomalies from the alert store included in each status report
const REPORT_RECENT_ANOMALIES: usize = 10;

/// Mutable detection state, owned by the orchestrator
///
/// Only the sampling tick mutates the baselines and rule history; the
/// health check writes the latest assessment.
pub struct AgentState {
    pub baselines: BaselineSet,
    pub detector: AnomalyDetector,
    pub last_sample: Option<MetricSample>,
    /// When `last_sample` was stored
    pub sampled_at: Option<Instant>,
    pub last_assessment: Option<HealthAssessment>,
    pub ticks: u64,
}

impl AgentState {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            baselines: BaselineSet::new(&config.detection),
            detector: AnomalyDetector::new(config.thresholds.clone(), &config.detection),
            last_sample: None,
            sampled_at: None,
            last_assessment: None,
            ticks: 0,
        }
    }
}

/// Snapshot served by the daemon's status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub node: String,
    pub mode: Mode,
    pub started_at: DateTime<Utc>,
    pub uptime: String,
    pub ticks: u64,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub assessment: Option<HealthAssessment>,
}

/// Running sampling task and its stop signal
struct Sampler {
    mode: Mode,
    stop: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl Sampler {
    /// Ask the loop to stop once its in-flight tick completes
    fn signal(&self) {
        let _ = self.stop.send(());
    }

    /// Stop the loop and wait for it to drain
    async fn stop(self) {
        self.signal();
        if let Err(e) = self.task.await {
            error!(mode = %self.mode, error = %e, "Sampling task ended abnormally");
        }
    }
}

pub struct Orchestrator {
    config: MonitorConfig,
    collector: Arc<dyn MetricsCollector>,
    executor: ResponseExecutor,
    state: Mutex<AgentState>,
    mode: RwLock<Mode>,
    alerts: AlertStore,
    reports: ReportStore,
    error_log: ErrorLog,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    started_at: DateTime<Utc>,
}

impl Orchestrator {
    pub fn new(
        config: MonitorConfig,
        data_dir: &DataDir,
        collector: Arc<dyn MetricsCollector>,
        executor: ResponseExecutor,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            state: Mutex::new(AgentState::new(&config)),
            config,
            collector,
            executor,
            mode: RwLock::new(Mode::Normal),
            alerts: data_dir.alert_store(),
            reports: data_dir.report_store(),
            error_log: data_dir.error_log(),
            health,
            metrics: AgentMetrics::new(),
            logger,
            started_at: Utc::now(),
        }
    }

    pub async fn mode(&self) -> Mode {
        *self.mode.read().await
    }

    pub async fn status(&self) -> AgentStatus {
        let state = self.state.lock().await;
        let uptime = (Utc::now() - self.started_at).num_seconds().max(0) as u64;
        AgentStatus {
            node: self.logger.node_name().to_string(),
            mode: self.mode().await,
            started_at: self.started_at,
            uptime: format_uptime(uptime),
            ticks: state.ticks,
            last_sample_at: state.last_sample.as_ref().map(|s| s.timestamp),
            assessment: state.last_assessment.clone(),
        }
    }

    /// Drive the sampling, health-check and report schedules until shutdown
    ///
    /// Returns once every schedule has drained; the caller writes the final
    /// report with [`Orchestrator::final_report`].
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let monitoring = &self.config.monitoring;
        info!(
            interval_ms = monitoring.interval,
            fast_interval_ms = monitoring.fast_interval,
            health_check_interval_ms = monitoring.health_check_interval,
            report_interval_ms = monitoring.report_interval,
            "Starting monitoring orchestrator"
        );

        let (mode_tx, mut mode_rx) = watch::channel(self.mode().await);
        let (timers_stop, _) = broadcast::channel(1);
        let mut sampler = self.spawn_sampler(*mode_rx.borrow(), None);
        let health = tokio::spawn(Arc::clone(&self).health_loop(mode_tx, timers_stop.subscribe()));
        let reports = tokio::spawn(Arc::clone(&self).report_loop(timers_stop.subscribe()));

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutting down monitoring orchestrator");
                    break;
                }
                changed = mode_rx.changed() => {
                    if changed.is_err() {
                        error!("Health check loop ended, sampling mode is now fixed");
                        let _ = shutdown.recv().await;
                        break;
                    }
                    let next = *mode_rx.borrow_and_update();
                    sampler = self.spawn_sampler(next, Some(sampler));
                }
            }
        }

        let _ = timers_stop.send(());
        for (schedule, handle) in [("health check", health), ("report", reports)] {
            if let Err(e) = handle.await {
                error!(schedule, error = %e, "Schedule ended abnormally");
            }
        }
        sampler.stop().await;
    }

    /// Start a sampling loop for `mode`, retiring `previous` without
    /// waiting on it here
    fn spawn_sampler(self: &Arc<Self>, mode: Mode, previous: Option<Sampler>) -> Sampler {
        if let Some(previous) = &previous {
            previous.signal();
        }
        let (stop, stop_rx) = broadcast::channel(1);
        let task = tokio::spawn(Arc::clone(self).sample_loop(mode, previous, stop_rx));
        Sampler { mode, stop, task }
    }

    async fn sample_loop(
        self: Arc<Self>,
        mode: Mode,
        previous: Option<Sampler>,
        mut stop: broadcast::Receiver<()>,
    ) {
        if let Some(previous) = previous {
            previous.stop().await;
        }

        let period = mode.interval(&self.config.monitoring);
        info!(mode = %mode, interval_ms = period.as_millis() as u64, "Sampling loop started");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.recv() => {
                    debug!(mode = %mode, "Sampling loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    // The tick completes even if a stop arrives meanwhile
                    match tokio::spawn(async move { this.tick(mode).await }).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => self.record_failure(
                            "sampling tick",
                            &format!("Sampling tick failed: {e:#}"),
                            None,
                        ),
                        Err(e) => self.record_panic("Sampling tick", e),
                    }
                }
            }
        }
    }

    /// Run health checks until stopped, publishing mode transitions
    async fn health_loop(
        self: Arc<Self>,
        mode_tx: watch::Sender<Mode>,
        mut stop: broadcast::Receiver<()>,
    ) {
        let period = self.config.monitoring.health_check_interval();
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.recv() => break,
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    match tokio::spawn(async move { this.health_check().await }).await {
                        Ok(Some(next)) => {
                            let _ = mode_tx.send(next);
                        }
                        Ok(None) => {}
                        Err(e) => self.record_panic("Health check", e),
                    }
                }
            }
        }
    }

    /// Write periodic status reports until stopped
    async fn report_loop(self: Arc<Self>, mut stop: broadcast::Receiver<()>) {
        let period = self.config.monitoring.report_interval();
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.recv() => break,
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    let report = tokio::spawn(async move { this.write_report(None).await });
                    if let Err(e) = report.await {
                        self.record_panic("Status report", e);
                    }
                }
            }
        }
    }

    /// One sampling tick: collect, detect, learn, respond, persist, summarize
    pub async fn tick(&self, mode: Mode) -> Result<()> {
        let start = Instant::now();
        let sample = match self.collector.collect().await {
            Ok(sample) => sample,
            Err(e) => {
                self.health
                    .set_unhealthy(components::COLLECTOR, e.to_string())
                    .await;
                return Err(e);
            }
        };
        self.metrics
            .observe_collection_latency(start.elapsed().as_secs_f64());
        self.metrics.record_sample(sample.collection_warnings.len());

        if sample.is_complete() {
            self.health.set_healthy(components::COLLECTOR).await;
        } else {
            self.health
                .set_degraded(components::COLLECTOR, sample.collection_warnings.join("; "))
                .await;
        }

        // Rules compare against history that does not yet include this sample
        let anomalies = {
            let mut state = self.state.lock().await;
            let anomalies = state.detector.analyze(&sample, &state.baselines);
            state.detector.record(&sample);
            state.baselines.train(&sample);
            state.last_sample = Some(sample.clone());
            state.sampled_at = Some(Instant::now());
            state.ticks += 1;
            anomalies
        };

        let mut response_failures = 0;
        for anomaly in &anomalies {
            self.metrics
                .inc_anomaly(anomaly.kind.as_str(), anomaly.severity.as_str());
            self.logger.log_anomaly(anomaly);
            self.persist_alert(AlertRecord::from_anomaly(
                anomaly,
                &sample.hostname,
                Utc::now(),
            ))
            .await;

            if let Some(report) = self.executor.respond(anomaly, &sample).await {
                response_failures += report.failed_count();
            }
        }

        if response_failures > 0 {
            self.health
                .set_degraded(
                    components::RESPONDER,
                    format!("{response_failures} remediation actions failed"),
                )
                .await;
        } else if !anomalies.is_empty() {
            self.health.set_healthy(components::RESPONDER).await;
        }

        self.logger.log_health_summary(
            mode.as_str(),
            sample.cpu.usage_percent,
            sample.memory.usage_percent,
            sample.max_disk_usage(),
            sample.connections.established_count,
            anomalies.len(),
        );
        self.health.mark_tick().await;
        Ok(())
    }

    async fn persist_alert(&self, record: AlertRecord) {
        if !self.config.alerts.log_to_file {
            return;
        }
        match self.alerts.append(&record) {
            Ok(path) => {
                debug!(path = %path.display(), "Alert persisted");
                self.health.set_healthy(components::STORAGE).await;
            }
            Err(e) => self.persistence_failed("alerts", &e.to_string()).await,
        }
    }

    /// Assess the host and switch modes when the assessment calls for it
    ///
    /// Returns the new mode on a transition.
    pub async fn health_check(&self) -> Option<Mode> {
        let sample = match self.recent_sample().await {
            Some(sample) => sample,
            None => match self.collector.collect().await {
                Ok(sample) => sample,
                Err(e) => {
                    warn!(error = %e, "Health check could not sample the host");
                    return None;
                }
            },
        };

        let assessment = HealthAssessment::evaluate(&sample, &self.config.thresholds);
        debug!(status = assessment.status.as_str(), "Health check complete");
        self.health.set_healthy(components::DETECTOR).await;

        let next = {
            let mut current = self.mode.write().await;
            let next = current.after_check(&assessment);
            let previous = std::mem::replace(&mut *current, next);
            (next != previous).then_some((previous, next))
        };
        self.state.lock().await.last_assessment = Some(assessment);

        let (previous, next) = next?;
        self.logger.log_mode_change(
            previous.as_str(),
            next.as_str(),
            next.interval(&self.config.monitoring).as_millis(),
        );
        self.metrics.set_critical_mode(next == Mode::Critical);
        Some(next)
    }

    /// The last tick's sample, if it is younger than one normal sampling
    /// period
    ///
    /// Health checks and reports reuse it instead of refreshing the host
    /// counters right after a tick did.
    async fn recent_sample(&self) -> Option<MetricSample> {
        let state = self.state.lock().await;
        let max_age = self.config.monitoring.interval();
        match state.sampled_at {
            Some(at) if at.elapsed() <= max_age => state.last_sample.clone(),
            _ => None,
        }
    }

    /// Build a status report from a recent sample, collecting one if the
    /// last tick is too old and falling back to it if collection fails
    pub async fn build_report(&self) -> Option<StatusReport> {
        let sample = match self.recent_sample().await {
            Some(sample) => sample,
            None => match self.collector.collect().await {
                Ok(sample) => sample,
                Err(e) => {
                    warn!(error = %e, "Report sampling failed, using last sample");
                    self.state.lock().await.last_sample.clone()?
                }
            },
        };

        let recent = self
            .alerts
            .list(&AlertQuery {
                limit: Some(REPORT_RECENT_ANOMALIES),
                ..Default::default()
            })
            .unwrap_or_else(|e| {
                warn!(error = %e, "Could not read recent alerts");
                Vec::new()
            });
        let baselines = self.state.lock().await.baselines.stats();
        let connectivity = probe_hosts(
            &self.config.connectivity.hosts,
            Duration::from_millis(self.config.connectivity.timeout_ms),
        )
        .await;

        Some(
            StatusReport::new(&sample, &self.config.thresholds, self.mode().await)
                .with_recent_anomalies(recent)
                .with_baselines(baselines)
                .with_connectivity(connectivity),
        )
    }

    /// Build and persist a status report
    pub async fn write_report(&self, shutdown_reason: Option<&str>) -> Option<PathBuf> {
        let mut report = self.build_report().await?;
        if let Some(reason) = shutdown_reason {
            report = report.with_shutdown_reason(reason);
        }

        if self.config.alerts.log_to_console {
            info!(event = "status_report", "{}", report.summary_line());
        }

        match self.reports.save(&report) {
            Ok(path) => {
                info!(
                    path = %path.display(),
                    status = report.summary.status.as_str(),
                    "Status report saved"
                );
                Some(path)
            }
            Err(e) => {
                self.persistence_failed("reports", &e.to_string()).await;
                None
            }
        }
    }

    /// Persist the last report, recording why the agent stopped
    pub async fn final_report(&self, reason: &str) -> Option<PathBuf> {
        self.logger.log_shutdown(reason);
        self.write_report(Some(reason)).await
    }

    async fn persistence_failed(&self, store: &str, error: &str) {
        self.metrics.inc_persistence_errors();
        self.logger.log_persistence_error(store, error);
        self.health
            .set_degraded(components::STORAGE, format!("{store}: {error}"))
            .await;
    }

    fn record_failure(&self, schedule: &str, message: &str, stack: Option<&str>) {
        error!(schedule, error = %message, "Scheduled task did not complete");
        self.metrics.inc_tick_failures();
        if let Err(e) = self.error_log.append(message, stack) {
            self.metrics.inc_persistence_errors();
            self.logger.log_persistence_error("errors", &e.to_string());
        }
    }

    fn record_panic(&self, task: &str, err: JoinError) {
        let message = panic_message(err);
        self.record_failure(
            &task.to_lowercase(),
            &format!("{task} panicked: {message}"),
            Some(&message),
        );
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
        Err(err) => err.to_string(),
    }
}
