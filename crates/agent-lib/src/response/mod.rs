//! Automated remediation
//!
//! This module provides:
//! - Playbooks mapping anomaly kinds to ordered remediation actions
//! - The [`PrivilegedActions`] seam and its host implementation
//! - Webhook notifications for admin and security alerts
//! - [`ResponseExecutor`], which runs a playbook and stops once the
//!   anomaly has cleared

mod actions;
mod notify;
mod playbook;

pub use actions::{ActionContext, ActionError, ActionOutcome, HostActions, PrivilegedActions};
pub use notify::{Audience, NotifyOutcome, WebhookNotifier, WebhookPayload};
pub use playbook::{is_resolved, ActionKind, ResponseAction, ResponseKey};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::anomaly::{Anomaly, AnomalyKind};
use crate::collector::MetricsCollector;
use crate::config::{MonitorConfig, Thresholds};
use crate::models::MetricSample;
use crate::observability::{AgentMetrics, StructuredLogger};

/// Status recorded for an action that returned an error
pub const FAILED_STATUS: &str = "failed";

/// One executed playbook step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub action: ActionKind,
    pub priority: u8,
    /// Outcome label, or `failed`
    pub status: String,
    pub detail: String,
}

/// Result of responding to one anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReport {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub key: ResponseKey,
    pub actions: Vec<ActionRecord>,
    /// Action after which a fresh sample showed the anomaly cleared
    pub resolved_after: Option<ActionKind>,
}

impl ResponseReport {
    pub fn failed_count(&self) -> usize {
        self.actions.iter().filter(|a| a.status == FAILED_STATUS).count()
    }
}

/// Runs playbooks for detected anomalies
pub struct ResponseExecutor {
    actions: Arc<dyn PrivilegedActions>,
    collector: Arc<dyn MetricsCollector>,
    thresholds: Thresholds,
    settle_delay: Duration,
    enabled: bool,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl ResponseExecutor {
    pub fn new(
        actions: Arc<dyn PrivilegedActions>,
        collector: Arc<dyn MetricsCollector>,
        thresholds: Thresholds,
        settle_delay: Duration,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            actions,
            collector,
            thresholds,
            settle_delay,
            enabled: true,
            metrics: AgentMetrics::new(),
            logger,
        }
    }

    /// Executor backed by [`HostActions`] and the configured webhook
    pub fn for_host(
        config: &MonitorConfig,
        collector: Arc<dyn MetricsCollector>,
        logger: StructuredLogger,
    ) -> anyhow::Result<Self> {
        let notifier = match &config.alerts.webhook_url {
            Some(url) if config.alerts.enabled => Some(Arc::new(WebhookNotifier::new(
                url.clone(),
                logger.node_name(),
                config.response.command_timeout(),
            )?)),
            _ => None,
        };
        let actions = HostActions::new(config.response.clone(), notifier);

        Ok(Self::new(
            Arc::new(actions),
            collector,
            config.thresholds.clone(),
            config.response.settle_delay(),
            logger,
        )
        .with_enabled(config.response.enabled))
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Execute the playbook for `anomaly`
    ///
    /// Actions run in ascending priority. After each action that did not
    /// skip, the executor waits for the settle delay, takes a fresh sample
    /// and stops if the anomaly has cleared. A failing action is logged and
    /// the next one runs. Returns `None` when no playbook applies.
    pub async fn respond(
        &self,
        anomaly: &Anomaly,
        sample: &MetricSample,
    ) -> Option<ResponseReport> {
        let Some(key) = ResponseKey::for_anomaly(anomaly.kind) else {
            warn!(
                event = "no_response",
                anomaly_type = %anomaly.kind,
                "No action defined for anomaly type"
            );
            return None;
        };

        if !self.enabled {
            debug!(
                anomaly_type = %anomaly.kind,
                response_key = %key,
                "Automated response disabled"
            );
            return None;
        }

        let mut report = ResponseReport {
            kind: anomaly.kind,
            key,
            actions: Vec::with_capacity(key.actions().len()),
            resolved_after: None,
        };
        let mut current = sample.clone();

        for step in key.actions() {
            let ctx = ActionContext {
                anomaly,
                sample: &current,
            };

            let (status, detail, recheck) = match self.actions.run(step.action, &ctx).await {
                Ok(outcome) => {
                    let recheck = !matches!(outcome, ActionOutcome::Skipped(_));
                    (outcome.label().to_string(), outcome.detail().to_string(), recheck)
                }
                Err(e) => (FAILED_STATUS.to_string(), e.to_string(), false),
            };

            self.metrics.inc_action(step.action.as_str(), &status);
            self.logger
                .log_action(anomaly.kind.as_str(), step.action.as_str(), &status, &detail);
            report.actions.push(ActionRecord {
                action: step.action,
                priority: step.priority,
                status,
                detail,
            });

            if !recheck {
                continue;
            }

            tokio::time::sleep(self.settle_delay).await;
            match self.collector.collect().await {
                Ok(fresh) => {
                    if is_resolved(anomaly.kind, &fresh, &self.thresholds) {
                        debug!(
                            anomaly_type = %anomaly.kind,
                            action = %step.action,
                            "Anomaly resolved, skipping remaining actions"
                        );
                        report.resolved_after = Some(step.action);
                        break;
                    }
                    current = fresh;
                }
                Err(e) => {
                    warn!(
                        anomaly_type = %anomaly.kind,
                        error = %e,
                        "Could not re-sample after action"
                    );
                }
            }
        }

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AnomalyMetrics, Severity};
    use crate::collector::async_trait;
    use crate::models::fixtures;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records every invocation; fails the actions listed in `failing`
    #[derive(Default)]
    struct CountingActions {
        calls: Mutex<Vec<ActionKind>>,
        failing: Vec<ActionKind>,
        skipping: Vec<ActionKind>,
    }

    impl CountingActions {
        fn calls(&self) -> Vec<ActionKind> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PrivilegedActions for CountingActions {
        async fn run(
            &self,
            action: ActionKind,
            _ctx: &ActionContext<'_>,
        ) -> Result<ActionOutcome, ActionError> {
            self.calls.lock().unwrap().push(action);
            if self.failing.contains(&action) {
                return Err(ActionError::Io {
                    action,
                    source: std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "operation not permitted",
                    ),
                });
            }
            if self.skipping.contains(&action) {
                return Ok(ActionOutcome::Skipped("no handler".to_string()));
            }
            Ok(ActionOutcome::Completed("done".to_string()))
        }
    }

    /// Returns queued samples, then repeats the last one
    struct ScriptedCollector {
        samples: Mutex<VecDeque<MetricSample>>,
        collected: Mutex<usize>,
    }

    impl ScriptedCollector {
        fn new(samples: Vec<MetricSample>) -> Self {
            Self {
                samples: Mutex::new(samples.into()),
                collected: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl MetricsCollector for ScriptedCollector {
        async fn collect(&self) -> anyhow::Result<MetricSample> {
            *self.collected.lock().unwrap() += 1;
            let mut samples = self.samples.lock().unwrap();
            if samples.len() > 1 {
                Ok(samples.pop_front().unwrap())
            } else {
                samples
                    .front()
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no samples scripted"))
            }
        }
    }

    fn anomaly(kind: AnomalyKind) -> Anomaly {
        Anomaly::rule(
            kind,
            Severity::Critical,
            "test anomaly",
            AnomalyMetrics {
                actual: 92.0,
                ..Default::default()
            },
        )
    }

    fn executor(
        actions: Arc<CountingActions>,
        collector: Arc<ScriptedCollector>,
    ) -> ResponseExecutor {
        ResponseExecutor::new(
            actions,
            collector,
            Thresholds::default(),
            Duration::ZERO,
            StructuredLogger::new("test-host"),
        )
    }

    #[tokio::test]
    async fn test_resolution_stops_lower_priority_actions() {
        let actions = Arc::new(CountingActions::default());
        let collector = Arc::new(ScriptedCollector::new(vec![fixtures::with_cpu(40.0)]));
        let executor = executor(actions.clone(), collector);

        let report = executor
            .respond(&anomaly(AnomalyKind::CpuSpike), &fixtures::with_cpu(92.0))
            .await
            .unwrap();

        assert_eq!(actions.calls(), vec![ActionKind::KillHighCpuProcesses]);
        assert_eq!(report.resolved_after, Some(ActionKind::KillHighCpuProcesses));
        assert_eq!(report.key, ResponseKey::CpuCritical);
    }

    #[tokio::test]
    async fn test_unresolved_runs_full_playbook_in_order() {
        let actions = Arc::new(CountingActions::default());
        let collector = Arc::new(ScriptedCollector::new(vec![fixtures::with_cpu(95.0)]));
        let executor = executor(actions.clone(), collector);

        let report = executor
            .respond(&anomaly(AnomalyKind::CpuSpike), &fixtures::with_cpu(95.0))
            .await
            .unwrap();

        assert_eq!(
            actions.calls(),
            vec![
                ActionKind::KillHighCpuProcesses,
                ActionKind::ReduceProcessPriority,
                ActionKind::AlertAdmin,
                ActionKind::ScaleResources,
            ]
        );
        assert!(report.resolved_after.is_none());
    }

    #[tokio::test]
    async fn test_kind_without_predicate_never_short_circuits() {
        let actions = Arc::new(CountingActions::default());
        let collector = Arc::new(ScriptedCollector::new(vec![fixtures::sample()]));
        let executor = executor(actions.clone(), collector);

        executor
            .respond(&anomaly(AnomalyKind::PotentialDdos), &fixtures::with_connections(400, 60))
            .await
            .unwrap();

        assert_eq!(actions.calls().len(), ResponseKey::SecurityThreat.actions().len());
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_sequence() {
        let actions = Arc::new(CountingActions {
            failing: vec![ActionKind::CleanupTempFiles],
            ..Default::default()
        });
        let collector = Arc::new(ScriptedCollector::new(vec![fixtures::with_disk(97.0)]));
        let executor = executor(actions.clone(), collector);

        let report = executor
            .respond(&anomaly(AnomalyKind::DiskFilling), &fixtures::with_disk(97.0))
            .await
            .unwrap();

        assert_eq!(actions.calls().len(), 4);
        assert_eq!(report.actions[0].status, FAILED_STATUS);
        assert!(report.actions[0].detail.contains("operation not permitted"));
        assert_eq!(report.failed_count(), 1);
    }

    #[tokio::test]
    async fn test_skipped_actions_do_not_resample() {
        let actions = Arc::new(CountingActions {
            skipping: vec![
                ActionKind::RateLimitConnections,
                ActionKind::BlockSuspiciousIps,
            ],
            ..Default::default()
        });
        let collector = Arc::new(ScriptedCollector::new(vec![fixtures::with_connections(400, 60)]));
        let executor = executor(actions.clone(), collector.clone());

        let report = executor
            .respond(&anomaly(AnomalyKind::ConnectionFlood), &fixtures::with_connections(400, 60))
            .await
            .unwrap();

        assert_eq!(actions.calls().len(), 3);
        let statuses: Vec<&str> = report.actions.iter().map(|a| a.status.as_str()).collect();
        assert_eq!(statuses, vec!["skipped", "skipped", "completed"]);
        // Only the completed alert triggered a re-sample
        assert_eq!(*collector.collected.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_type_takes_no_action() {
        let actions = Arc::new(CountingActions::default());
        let collector = Arc::new(ScriptedCollector::new(vec![fixtures::sample()]));
        let executor = executor(actions.clone(), collector);

        let report = executor
            .respond(&anomaly(AnomalyKind::GenericMlAnomaly), &fixtures::sample())
            .await;

        assert!(report.is_none());
        assert!(actions.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_executor_takes_no_action() {
        let actions = Arc::new(CountingActions::default());
        let collector = Arc::new(ScriptedCollector::new(vec![fixtures::sample()]));
        let executor = executor(actions.clone(), collector).with_enabled(false);

        assert!(executor
            .respond(&anomaly(AnomalyKind::CpuSpike), &fixtures::with_cpu(95.0))
            .await
            .is_none());
        assert!(actions.calls().is_empty());
    }
}
