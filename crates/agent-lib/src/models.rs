//! Core data models for the monitoring agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of host state, produced once per sampling tick
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub platform: String,
    pub uptime_secs: u64,
    pub cpu: CpuSnapshot,
    pub memory: MemorySnapshot,
    pub disk: Vec<DiskUsage>,
    pub network: NetworkSnapshot,
    pub processes: ProcessSnapshot,
    pub ports: PortSnapshot,
    pub connections: ConnectionSnapshot,
    /// Sub-queries that failed or timed out; their fields hold defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collection_warnings: Vec<String>,
}

impl MetricSample {
    /// Usage of the fullest mount, 0 when no disks were collected
    pub fn max_disk_usage(&self) -> f64 {
        self.disk
            .iter()
            .map(|d| d.usage_percent)
            .fold(0.0, f64::max)
    }

    /// True when every sub-query succeeded
    pub fn is_complete(&self) -> bool {
        self.collection_warnings.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuSnapshot {
    pub usage_percent: f64,
    pub cores: usize,
    /// 1, 5 and 15 minute load averages
    pub load_average: [f64; 3],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    pub mount_point: String,
    pub filesystem: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSnapshot {
    pub interfaces: Vec<InterfaceInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    pub name: String,
    pub mac: String,
    pub received_bytes: u64,
    pub transmitted_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    /// Processes sorted by descending CPU usage
    pub top_by_cpu: Vec<ProcessInfo>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub command: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSnapshot {
    pub open_count: usize,
    pub listeners: Vec<Listener>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub protocol: String,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub established_count: usize,
    pub unique_remote_ips: Vec<String>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A quiet host: low CPU, moderate memory, one half-full disk
    pub fn sample() -> MetricSample {
        MetricSample {
            timestamp: Utc::now(),
            hostname: "test-host".to_string(),
            platform: "linux".to_string(),
            uptime_secs: 3600,
            cpu: CpuSnapshot {
                usage_percent: 20.0,
                cores: 4,
                load_average: [0.5, 0.4, 0.3],
            },
            memory: MemorySnapshot {
                total_bytes: 8 * 1024 * 1024 * 1024,
                free_bytes: 4 * 1024 * 1024 * 1024,
                usage_percent: 50.0,
            },
            disk: vec![DiskUsage {
                mount_point: "/".to_string(),
                filesystem: "ext4".to_string(),
                total_bytes: 100 * 1024 * 1024 * 1024,
                available_bytes: 50 * 1024 * 1024 * 1024,
                usage_percent: 50.0,
            }],
            network: NetworkSnapshot::default(),
            processes: ProcessSnapshot::default(),
            ports: PortSnapshot::default(),
            connections: ConnectionSnapshot {
                established_count: 10,
                unique_remote_ips: vec!["10.0.0.1".to_string()],
            },
            collection_warnings: Vec::new(),
        }
    }

    pub fn with_cpu(usage: f64) -> MetricSample {
        let mut s = sample();
        s.cpu.usage_percent = usage;
        s
    }

    pub fn with_memory(usage: f64) -> MetricSample {
        let mut s = sample();
        s.memory.usage_percent = usage;
        s
    }

    pub fn with_connections(count: usize, unique_ips: usize) -> MetricSample {
        let mut s = sample();
        s.connections.established_count = count;
        s.connections.unique_remote_ips = (0..unique_ips)
            .map(|i| format!("10.1.{}.{}", i / 250, i % 250))
            .collect();
        s
    }

    pub fn with_disk(usage: f64) -> MetricSample {
        let mut s = sample();
        s.disk[0].usage_percent = usage;
        s
    }

    #[test]
    fn test_max_disk_usage() {
        let mut s = sample();
        s.disk.push(DiskUsage {
            mount_point: "/data".to_string(),
            filesystem: "xfs".to_string(),
            total_bytes: 10,
            available_bytes: 1,
            usage_percent: 90.0,
        });
        assert!((s.max_disk_usage() - 90.0).abs() < f64::EPSILON);

        s.disk.clear();
        assert_eq!(s.max_disk_usage(), 0.0);
    }
}
