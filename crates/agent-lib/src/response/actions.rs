//! Privileged host actions
//!
//! The executor only sees the [`PrivilegedActions`] seam. [`HostActions`]
//! is the implementation that signals processes, drops caches, deletes aged
//! temp files and sends webhook notifications. Every action is safe to
//! repeat: when there is nothing left to do it reports [`ActionOutcome::NoOp`].

use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::notify::{Audience, NotifyOutcome, WebhookNotifier};
use super::playbook::ActionKind;
use crate::anomaly::Anomaly;
use crate::config::ResponseSettings;
use crate::models::{MetricSample, ProcessInfo};

/// CPU percentage above which a process is a kill/renice candidate
const CANDIDATE_CPU_PERCENT: f64 = 80.0;

/// Most processes touched by one kill or renice action
const MAX_CANDIDATES: usize = 3;

const RENICE_INCREMENT: &str = "10";

const DEFAULT_DROP_CACHES_PATH: &str = "/proc/sys/vm/drop_caches";

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{action} timed out after {timeout_ms}ms")]
    Timeout { action: ActionKind, timeout_ms: u64 },

    #[error("{action} failed: {source}")]
    Io {
        action: ActionKind,
        #[source]
        source: io::Error,
    },

    #[error("{action}: `{command}` failed: {stderr}")]
    Command {
        action: ActionKind,
        command: String,
        stderr: String,
    },

    #[error("{action}: notification failed: {source}")]
    Notify {
        action: ActionKind,
        #[source]
        source: reqwest::Error,
    },
}

/// What an action did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ActionOutcome {
    Completed(String),
    /// Nothing to do; the condition the action targets is absent
    NoOp(String),
    /// No handler exists on this host
    Skipped(String),
    /// Response is in dry-run mode; nothing was touched
    DryRun(String),
}

impl ActionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Completed(_) => "completed",
            ActionOutcome::NoOp(_) => "noop",
            ActionOutcome::Skipped(_) => "skipped",
            ActionOutcome::DryRun(_) => "dry_run",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            ActionOutcome::Completed(d)
            | ActionOutcome::NoOp(d)
            | ActionOutcome::Skipped(d)
            | ActionOutcome::DryRun(d) => d,
        }
    }
}

/// Inputs available to an action
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub anomaly: &'a Anomaly,
    /// Most recent sample, refreshed after every action
    pub sample: &'a MetricSample,
}

/// Executes named remediation actions against the host
#[async_trait]
pub trait PrivilegedActions: Send + Sync {
    async fn run(
        &self,
        action: ActionKind,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError>;
}

/// Actions against the local host
pub struct HostActions {
    settings: ResponseSettings,
    notifier: Option<Arc<WebhookNotifier>>,
    own_pid: u32,
    drop_caches_path: PathBuf,
}

impl HostActions {
    pub fn new(settings: ResponseSettings, notifier: Option<Arc<WebhookNotifier>>) -> Self {
        Self {
            settings,
            notifier,
            own_pid: std::process::id(),
            drop_caches_path: PathBuf::from(DEFAULT_DROP_CACHES_PATH),
        }
    }

    /// Write cache-drop requests somewhere other than procfs
    pub fn with_drop_caches_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.drop_caches_path = path.into();
        self
    }

    fn timeout(&self) -> Duration {
        self.settings.command_timeout()
    }

    /// Hottest processes above the candidate threshold, never this agent
    fn candidates<'a>(&self, sample: &'a MetricSample) -> Vec<&'a ProcessInfo> {
        sample
            .processes
            .top_by_cpu
            .iter()
            .filter(|p| p.cpu_percent > CANDIDATE_CPU_PERCENT && p.pid != self.own_pid)
            .take(MAX_CANDIDATES)
            .collect()
    }

    async fn run_command(
        &self,
        action: ActionKind,
        program: &str,
        args: &[&str],
    ) -> Result<Output, ActionError> {
        let command = format!("{program} {}", args.join(" "));
        debug!(action = %action, command = %command, "Running command");

        let child = Command::new(program).args(args).kill_on_drop(true).output();
        match tokio::time::timeout(self.timeout(), child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(ActionError::Io { action, source }),
            Err(_) => Err(ActionError::Timeout {
                action,
                timeout_ms: self.timeout().as_millis() as u64,
            }),
        }
    }

    /// Run `program` once per candidate PID, tolerating processes that
    /// have already exited
    async fn for_each_candidate(
        &self,
        action: ActionKind,
        sample: &MetricSample,
        program: &str,
        leading_args: &[&str],
        verb: &str,
    ) -> Result<ActionOutcome, ActionError> {
        let candidates = self.candidates(sample);
        if candidates.is_empty() {
            return Ok(ActionOutcome::NoOp(format!(
                "no process above {CANDIDATE_CPU_PERCENT}% CPU"
            )));
        }

        let mut touched = Vec::new();
        let mut last_error = None;
        for process in candidates {
            let pid = process.pid.to_string();
            let mut args = leading_args.to_vec();
            args.push(&pid);

            let output = match self.run_command(action, program, &args).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(action = %action, pid = process.pid, error = %e, "Command did not run");
                    last_error = Some(e);
                    continue;
                }
            };
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if output.status.success() {
                info!(
                    action = %action,
                    pid = process.pid,
                    command = %process.command,
                    "Process {verb}"
                );
                touched.push(format!("{} ({})", process.command, process.pid));
            } else if stderr.contains("No such process") {
                debug!(action = %action, pid = process.pid, "Process already gone");
            } else {
                warn!(action = %action, pid = process.pid, error = %stderr, "Command failed");
                last_error = Some(ActionError::Command {
                    action,
                    command: format!("{program} {}", args.join(" ")),
                    stderr,
                });
            }
        }

        match (touched.is_empty(), last_error) {
            (true, Some(err)) => Err(err),
            (true, None) => Ok(ActionOutcome::NoOp("candidates already exited".to_string())),
            (false, _) => Ok(ActionOutcome::Completed(format!(
                "{verb}: {}",
                touched.join(", ")
            ))),
        }
    }

    async fn clear_cache(&self) -> Result<ActionOutcome, ActionError> {
        let action = ActionKind::ClearCache;
        let output = self.run_command(action, "sync", &[]).await?;
        if !output.status.success() {
            return Err(ActionError::Command {
                action,
                command: "sync".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tokio::fs::write(&self.drop_caches_path, b"3")
            .await
            .map_err(|source| ActionError::Io { action, source })?;
        Ok(ActionOutcome::Completed("page cache dropped".to_string()))
    }

    async fn cleanup_temp_files(&self) -> Result<ActionOutcome, ActionError> {
        let action = ActionKind::CleanupTempFiles;
        let dirs: Vec<PathBuf> = self.settings.temp_dirs.iter().map(PathBuf::from).collect();
        let max_age = Duration::from_secs(self.settings.temp_file_max_age_days * SECS_PER_DAY);

        let task = tokio::task::spawn_blocking(move || {
            let cutoff = SystemTime::now()
                .checked_sub(max_age)
                .unwrap_or(SystemTime::UNIX_EPOCH);
            dirs.iter().map(|d| remove_older_than(d, cutoff)).sum::<usize>()
        });

        let removed = match tokio::time::timeout(self.timeout(), task).await {
            Ok(Ok(removed)) => removed,
            Ok(Err(join_err)) => {
                return Err(ActionError::Io {
                    action,
                    source: io::Error::new(io::ErrorKind::Other, join_err.to_string()),
                })
            }
            Err(_) => {
                return Err(ActionError::Timeout {
                    action,
                    timeout_ms: self.timeout().as_millis() as u64,
                })
            }
        };

        if removed == 0 {
            Ok(ActionOutcome::NoOp("no aged temp files".to_string()))
        } else {
            Ok(ActionOutcome::Completed(format!("removed {removed} temp files")))
        }
    }

    async fn notify(
        &self,
        action: ActionKind,
        anomaly: &Anomaly,
        audience: Audience,
    ) -> Result<ActionOutcome, ActionError> {
        let Some(notifier) = &self.notifier else {
            return Ok(ActionOutcome::NoOp("no webhook configured".to_string()));
        };

        match notifier.notify(anomaly, audience).await {
            Ok(NotifyOutcome::Sent) => {
                Ok(ActionOutcome::Completed("notification sent".to_string()))
            }
            Ok(NotifyOutcome::Suppressed) => {
                Ok(ActionOutcome::NoOp("duplicate notification suppressed".to_string()))
            }
            Err(source) => Err(ActionError::Notify { action, source }),
        }
    }
}

/// Recursively delete regular files last modified before `cutoff`
///
/// Symlinks are never followed; unreadable entries are left alone.
fn remove_older_than(dir: &Path, cutoff: SystemTime) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            continue;
        };

        if meta.is_dir() {
            removed += remove_older_than(&path, cutoff);
        } else if meta.is_file() {
            let aged = meta.modified().map(|m| m < cutoff).unwrap_or(false);
            if aged {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Could not remove temp file")
                    }
                }
            }
        }
    }
    removed
}

#[async_trait]
impl PrivilegedActions for HostActions {
    async fn run(
        &self,
        action: ActionKind,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let handled = matches!(
            action,
            ActionKind::KillHighCpuProcesses
                | ActionKind::ReduceProcessPriority
                | ActionKind::ClearCache
                | ActionKind::CleanupTempFiles
                | ActionKind::BlockSuspiciousIps
                | ActionKind::AlertAdmin
                | ActionKind::AlertSecurityTeam
        );
        if !handled {
            return Ok(ActionOutcome::Skipped(format!("no handler for {action} on this host")));
        }

        if self.settings.dry_run {
            info!(
                action = %action,
                anomaly_type = %ctx.anomaly.kind,
                "Dry run, action not executed"
            );
            return Ok(ActionOutcome::DryRun(format!("would run {action}")));
        }

        match action {
            ActionKind::KillHighCpuProcesses => {
                self.for_each_candidate(action, ctx.sample, "kill", &["-TERM"], "terminated")
                    .await
            }
            ActionKind::ReduceProcessPriority => {
                self.for_each_candidate(
                    action,
                    ctx.sample,
                    "renice",
                    &["-n", RENICE_INCREMENT, "-p"],
                    "reniced",
                )
                .await
            }
            ActionKind::ClearCache => self.clear_cache().await,
            ActionKind::CleanupTempFiles => self.cleanup_temp_files().await,
            ActionKind::BlockSuspiciousIps => {
                let count = ctx.sample.connections.unique_remote_ips.len();
                info!(
                    action = %action,
                    remote_ips = count,
                    "Firewall integration not configured, no addresses blocked"
                );
                Ok(ActionOutcome::NoOp(format!(
                    "firewall integration not configured ({count} remote addresses seen)"
                )))
            }
            ActionKind::AlertAdmin => self.notify(action, ctx.anomaly, Audience::Admin).await,
            ActionKind::AlertSecurityTeam => {
                self.notify(action, ctx.anomaly, Audience::SecurityTeam).await
            }
            _ => Ok(ActionOutcome::Skipped(format!("no handler for {action} on this host"))),
        }
    }
}
