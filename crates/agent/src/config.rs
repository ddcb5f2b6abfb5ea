//! Daemon configuration
//!
//! Process-level settings come from `HOSTWATCH_*` environment variables.
//! Monitoring behavior lives in the JSON monitor config under the data
//! directory.

use anyhow::{Context, Result};
use hostwatch_core::DataDir;
use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Host name used in logs and webhook payloads
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Root of the alerts, reports and logs stores
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Monitor config file; defaults to `<data_dir>/config/monitor-config.json`
    #[serde(default)]
    pub config_path: Option<PathBuf>,

    /// API server port for health/status/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Blocking OS query timeout in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(sysinfo::System::host_name)
        .unwrap_or_else(|| "unknown".to_string())
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("monitoring")
}

fn default_api_port() -> u16 {
    8080
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("HOSTWATCH").try_parsing(true))
            .build()
            .context("Failed to read HOSTWATCH_* environment")?;

        config
            .try_deserialize()
            .context("Invalid HOSTWATCH_* environment configuration")
    }

    pub fn data_dir(&self) -> DataDir {
        DataDir::new(&self.data_dir)
    }

    pub fn monitor_config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| self.data_dir().config_path())
    }
}
