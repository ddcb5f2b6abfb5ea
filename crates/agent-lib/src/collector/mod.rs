//! Host metrics collection
//!
//! This module provides the [`MetricsCollector`] seam and its host
//! implementation. CPU, memory, processes, disks and interfaces come from
//! `sysinfo`; listening ports and established connections are parsed from
//! `/proc/net/tcp{,6}`. Every blocking sub-query runs on the blocking pool
//! under its own timeout, and a failed sub-query leaves its fields at their
//! defaults instead of failing the sample.

mod procnet;
mod system;

#[cfg(test)]
mod tests;

pub use procnet::{parse_tcp_table, read_socket_tables, SocketEntry, TcpState};
pub use system::SystemCollector;

use std::time::Duration;

use anyhow::Result;
use thiserror::Error;

use crate::models::MetricSample;

pub use async_trait::async_trait;

/// Failure of a single collection sub-query
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("{query} query timed out after {timeout_ms}ms")]
    Timeout { query: &'static str, timeout_ms: u64 },

    #[error("{query} query failed: {message}")]
    Failed { query: &'static str, message: String },

    #[error("{query} query task aborted: {message}")]
    Aborted { query: &'static str, message: String },
}

/// Trait for metrics collection implementations
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Take a snapshot of the host
    ///
    /// Implementations degrade per field; an `Err` means no sample at all
    /// could be produced.
    async fn collect(&self) -> Result<MetricSample>;
}

/// Run a blocking OS query on the blocking pool, bounded by `timeout`
pub(crate) async fn run_blocking<T, F>(
    query: &'static str,
    timeout: Duration,
    f: F,
) -> Result<T, CollectError>
where
    F: FnOnce() -> Result<T, String> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(message))) => Err(CollectError::Failed { query, message }),
        Ok(Err(join_err)) => Err(CollectError::Aborted {
            query,
            message: join_err.to_string(),
        }),
        Err(_) => Err(CollectError::Timeout {
            query,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
