//! Static playbooks: anomaly kind to response key to ordered actions

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::anomaly::AnomalyKind;
use crate::config::Thresholds;
use crate::models::MetricSample;

/// Connection count below which a flood counts as over
const FLOOD_RESOLVED_BELOW: f64 = 100.0;

/// Group of remediation actions shared by related anomaly kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKey {
    CpuCritical,
    MemoryCritical,
    DiskCritical,
    NetworkAnomaly,
    SecurityThreat,
}

/// A single remediation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    KillHighCpuProcesses,
    ReduceProcessPriority,
    AlertAdmin,
    ScaleResources,
    ClearCache,
    KillMemoryHogs,
    RestartServices,
    CleanupTempFiles,
    CompressLogs,
    ArchiveOldData,
    BlockSuspiciousIps,
    RateLimitConnections,
    AlertSecurityTeam,
    IsolateSystem,
    BackupCriticalData,
    EnableEnhancedMonitoring,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::KillHighCpuProcesses => "kill_high_cpu_processes",
            ActionKind::ReduceProcessPriority => "reduce_process_priority",
            ActionKind::AlertAdmin => "alert_admin",
            ActionKind::ScaleResources => "scale_resources",
            ActionKind::ClearCache => "clear_cache",
            ActionKind::KillMemoryHogs => "kill_memory_hogs",
            ActionKind::RestartServices => "restart_services",
            ActionKind::CleanupTempFiles => "cleanup_temp_files",
            ActionKind::CompressLogs => "compress_logs",
            ActionKind::ArchiveOldData => "archive_old_data",
            ActionKind::BlockSuspiciousIps => "block_suspicious_ips",
            ActionKind::RateLimitConnections => "rate_limit_connections",
            ActionKind::AlertSecurityTeam => "alert_security_team",
            ActionKind::IsolateSystem => "isolate_system",
            ActionKind::BackupCriticalData => "backup_critical_data",
            ActionKind::EnableEnhancedMonitoring => "enable_enhanced_monitoring",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action and its position in the playbook (1 runs first)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseAction {
    pub action: ActionKind,
    pub priority: u8,
}

const fn step(action: ActionKind, priority: u8) -> ResponseAction {
    ResponseAction { action, priority }
}

const CPU_CRITICAL: &[ResponseAction] = &[
    step(ActionKind::KillHighCpuProcesses, 1),
    step(ActionKind::ReduceProcessPriority, 2),
    step(ActionKind::AlertAdmin, 3),
    step(ActionKind::ScaleResources, 4),
];

const MEMORY_CRITICAL: &[ResponseAction] = &[
    step(ActionKind::ClearCache, 1),
    step(ActionKind::KillMemoryHogs, 2),
    step(ActionKind::RestartServices, 3),
    step(ActionKind::AlertAdmin, 4),
];

const DISK_CRITICAL: &[ResponseAction] = &[
    step(ActionKind::CleanupTempFiles, 1),
    step(ActionKind::CompressLogs, 2),
    step(ActionKind::ArchiveOldData, 3),
    step(ActionKind::AlertAdmin, 4),
];

const NETWORK_ANOMALY: &[ResponseAction] = &[
    step(ActionKind::BlockSuspiciousIps, 1),
    step(ActionKind::RateLimitConnections, 2),
    step(ActionKind::AlertSecurityTeam, 3),
];

const SECURITY_THREAT: &[ResponseAction] = &[
    step(ActionKind::IsolateSystem, 1),
    step(ActionKind::BackupCriticalData, 2),
    step(ActionKind::AlertSecurityTeam, 3),
    step(ActionKind::EnableEnhancedMonitoring, 4),
];

impl ResponseKey {
    /// Playbook for an anomaly kind, `None` when no response is defined
    pub fn for_anomaly(kind: AnomalyKind) -> Option<Self> {
        match kind {
            AnomalyKind::CpuSpike | AnomalyKind::HighLoad | AnomalyKind::HighCpuProcess => {
                Some(ResponseKey::CpuCritical)
            }
            AnomalyKind::MemoryLeak => Some(ResponseKey::MemoryCritical),
            AnomalyKind::DiskFilling => Some(ResponseKey::DiskCritical),
            AnomalyKind::ConnectionFlood => Some(ResponseKey::NetworkAnomaly),
            AnomalyKind::PotentialDdos => Some(ResponseKey::SecurityThreat),
            AnomalyKind::GenericMlAnomaly => None,
        }
    }

    /// Actions sorted by ascending priority
    pub fn actions(&self) -> &'static [ResponseAction] {
        match self {
            ResponseKey::CpuCritical => CPU_CRITICAL,
            ResponseKey::MemoryCritical => MEMORY_CRITICAL,
            ResponseKey::DiskCritical => DISK_CRITICAL,
            ResponseKey::NetworkAnomaly => NETWORK_ANOMALY,
            ResponseKey::SecurityThreat => SECURITY_THREAT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKey::CpuCritical => "cpu_critical",
            ResponseKey::MemoryCritical => "memory_critical",
            ResponseKey::DiskCritical => "disk_critical",
            ResponseKey::NetworkAnomaly => "network_anomaly",
            ResponseKey::SecurityThreat => "security_threat",
        }
    }
}

impl fmt::Display for ResponseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a fresh sample shows the anomaly has cleared
///
/// Kinds without a predicate never count as resolved, so their full
/// playbook always runs.
pub fn is_resolved(kind: AnomalyKind, sample: &MetricSample, thresholds: &Thresholds) -> bool {
    match kind {
        AnomalyKind::CpuSpike => sample.cpu.usage_percent < thresholds.cpu.warning,
        AnomalyKind::MemoryLeak => sample.memory.usage_percent < thresholds.memory.warning,
        AnomalyKind::ConnectionFlood => {
            (sample.connections.established_count as f64) < FLOOD_RESOLVED_BELOW
        }
        AnomalyKind::DiskFilling => sample.max_disk_usage() < thresholds.disk.warning,
        AnomalyKind::HighLoad
        | AnomalyKind::PotentialDdos
        | AnomalyKind::HighCpuProcess
        | AnomalyKind::GenericMlAnomaly => false,
    }
}
