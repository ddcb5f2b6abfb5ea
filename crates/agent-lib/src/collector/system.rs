//! Host collector backed by `sysinfo` and procfs

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use sysinfo::{
    CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind, RefreshKind, System,
};
use tracing::{debug, warn};

use super::{async_trait, procnet, run_blocking, CollectError, MetricsCollector};
use crate::models::{
    ConnectionSnapshot, CpuSnapshot, DiskUsage, InterfaceInfo, MemorySnapshot, MetricSample,
    NetworkSnapshot, PortSnapshot, ProcessInfo, ProcessSnapshot,
};

/// Processes kept in `top_by_cpu`
const DEFAULT_TOP_PROCESSES: usize = 10;

/// Default procfs mount for socket tables
const DEFAULT_PROC_ROOT: &str = "/proc";

fn refresh_kind() -> RefreshKind {
    RefreshKind::new()
        .with_processes(ProcessRefreshKind::everything())
        .with_memory(MemoryRefreshKind::everything())
        .with_cpu(CpuRefreshKind::everything())
}

struct CpuMemProc {
    cpu: CpuSnapshot,
    memory: MemorySnapshot,
    processes: ProcessSnapshot,
}

/// `System` plus the time of its last CPU refresh
struct SharedSystem {
    system: System,
    refreshed_at: Instant,
}

impl SharedSystem {
    /// Refresh, first waiting out sysinfo's minimum CPU update interval so
    /// the usage delta always spans a measurable window
    fn refresh(&mut self) {
        let since = self.refreshed_at.elapsed();
        if since < sysinfo::MINIMUM_CPU_UPDATE_INTERVAL {
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL - since);
        }
        self.system.refresh_specifics(refresh_kind());
        self.refreshed_at = Instant::now();
    }
}

/// Collects a [`MetricSample`] from the local host
///
/// The `System` handle is kept between ticks so CPU usage reflects the
/// interval since the previous collection. Collections that arrive closer
/// together than sysinfo can measure are spaced out.
pub struct SystemCollector {
    system: Arc<Mutex<SharedSystem>>,
    query_timeout: Duration,
    proc_root: PathBuf,
    top_processes: usize,
}

impl SystemCollector {
    pub fn new(query_timeout: Duration) -> Self {
        let mut shared = SharedSystem {
            system: System::new_with_specifics(refresh_kind()),
            refreshed_at: Instant::now(),
        };
        // Second refresh gives the first collection a CPU delta to work with
        shared.refresh();

        Self {
            system: Arc::new(Mutex::new(shared)),
            query_timeout,
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            top_processes: DEFAULT_TOP_PROCESSES,
        }
    }

    /// Read socket tables from a different procfs root
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    pub fn with_top_processes(mut self, count: usize) -> Self {
        self.top_processes = count;
        self
    }

    async fn query_cpu_mem_proc(&self) -> Result<CpuMemProc, CollectError> {
        let system = Arc::clone(&self.system);
        let top = self.top_processes;

        run_blocking("system", self.query_timeout, move || {
            let mut shared = system
                .lock()
                .map_err(|_| "system handle poisoned".to_string())?;
            shared.refresh();
            let sys = &shared.system;

            let load = System::load_average();
            let cpu = CpuSnapshot {
                usage_percent: round1(sys.global_cpu_usage() as f64),
                cores: sys.cpus().len(),
                load_average: [load.one, load.five, load.fifteen],
            };

            let total = sys.total_memory();
            let available = sys.available_memory();
            let memory = MemorySnapshot {
                total_bytes: total,
                free_bytes: available,
                usage_percent: if total == 0 {
                    0.0
                } else {
                    round1((total - available.min(total)) as f64 / total as f64 * 100.0)
                },
            };

            let mut procs: Vec<ProcessInfo> = sys
                .processes()
                .iter()
                .map(|(pid, p)| ProcessInfo {
                    pid: pid.as_u32(),
                    command: p.name().to_string_lossy().into_owned(),
                    cpu_percent: round1(p.cpu_usage() as f64),
                    memory_bytes: p.memory(),
                })
                .collect();
            let total_procs = procs.len();
            procs.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
            procs.truncate(top);

            Ok(CpuMemProc {
                cpu,
                memory,
                processes: ProcessSnapshot {
                    top_by_cpu: procs,
                    total: total_procs,
                },
            })
        })
        .await
    }

    async fn query_disks(&self) -> Result<Vec<DiskUsage>, CollectError> {
        run_blocking("disk", self.query_timeout, || {
            let disks = Disks::new_with_refreshed_list();
            Ok(disks
                .iter()
                .filter(|d| d.total_space() > 0)
                .map(|d| {
                    let total = d.total_space();
                    let available = d.available_space();
                    DiskUsage {
                        mount_point: d.mount_point().to_string_lossy().into_owned(),
                        filesystem: d.file_system().to_string_lossy().into_owned(),
                        total_bytes: total,
                        available_bytes: available,
                        usage_percent: round1(
                            (total - available.min(total)) as f64 / total as f64 * 100.0,
                        ),
                    }
                })
                .collect())
        })
        .await
    }

    async fn query_interfaces(&self) -> Result<NetworkSnapshot, CollectError> {
        run_blocking("network", self.query_timeout, || {
            let networks = Networks::new_with_refreshed_list();
            let mut interfaces: Vec<InterfaceInfo> = networks
                .iter()
                .map(|(name, data)| InterfaceInfo {
                    name: name.to_string(),
                    mac: data.mac_address().to_string(),
                    received_bytes: data.total_received(),
                    transmitted_bytes: data.total_transmitted(),
                })
                .collect();
            interfaces.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(NetworkSnapshot { interfaces })
        })
        .await
    }

    async fn query_sockets(&self) -> Result<(PortSnapshot, ConnectionSnapshot), CollectError> {
        let root = self.proc_root.clone();
        run_blocking("sockets", self.query_timeout, move || {
            procnet::read_socket_tables(&root).map_err(|e| e.to_string())
        })
        .await
    }
}

/// Keep the value or fall back to the default, noting the failure
fn or_default<T: Default>(result: Result<T, CollectError>, warnings: &mut Vec<String>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Collection sub-query failed, using defaults");
            warnings.push(e.to_string());
            T::default()
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[async_trait]
impl MetricsCollector for SystemCollector {
    async fn collect(&self) -> Result<MetricSample> {
        let (system, disks, interfaces, sockets) = tokio::join!(
            self.query_cpu_mem_proc(),
            self.query_disks(),
            self.query_interfaces(),
            self.query_sockets(),
        );

        let mut warnings = Vec::new();
        let (cpu, memory, processes) = match system {
            Ok(s) => (s.cpu, s.memory, s.processes),
            Err(e) => {
                warn!(error = %e, "Collection sub-query failed, using defaults");
                warnings.push(e.to_string());
                Default::default()
            }
        };
        let disk = or_default(disks, &mut warnings);
        let network = or_default(interfaces, &mut warnings);
        let (ports, connections) = or_default(sockets, &mut warnings);

        let sample = MetricSample {
            timestamp: Utc::now(),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            platform: std::env::consts::OS.to_string(),
            uptime_secs: System::uptime(),
            cpu,
            memory,
            disk,
            network,
            processes,
            ports,
            connections,
            collection_warnings: warnings,
        };

        debug!(
            cpu = sample.cpu.usage_percent,
            memory = sample.memory.usage_percent,
            connections = sample.connections.established_count,
            warnings = sample.collection_warnings.len(),
            "Collected host sample"
        );

        Ok(sample)
    }
}
