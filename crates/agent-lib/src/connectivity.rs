//! Reachability probe for well-known hosts
//!
//! Results only annotate status reports; they never feed detection.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Reachable,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityResult {
    pub host: String,
    pub status: Reachability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectivityResult {
    fn reachable(host: &str, latency: Duration) -> Self {
        Self {
            host: host.to_string(),
            status: Reachability::Reachable,
            latency_ms: Some(latency.as_millis() as u64),
            error: None,
        }
    }

    fn unreachable(host: &str, error: impl Into<String>) -> Self {
        Self {
            host: host.to_string(),
            status: Reachability::Unreachable,
            latency_ms: None,
            error: Some(error.into()),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.status == Reachability::Reachable
    }
}

/// Resolve all hosts concurrently, bounding every lookup by `timeout`
///
/// Results keep the order of `hosts`.
pub async fn probe_hosts(hosts: &[String], timeout: Duration) -> Vec<ConnectivityResult> {
    let mut probes = JoinSet::new();
    for (index, host) in hosts.iter().cloned().enumerate() {
        probes.spawn(async move { (index, probe(&host, timeout).await) });
    }

    let mut results: Vec<Option<ConnectivityResult>> = vec![None; hosts.len()];
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => warn!(error = %e, "Connectivity probe task failed"),
        }
    }

    hosts
        .iter()
        .zip(results)
        .map(|(host, result)| {
            result.unwrap_or_else(|| ConnectivityResult::unreachable(host, "probe task failed"))
        })
        .collect()
}

async fn probe(host: &str, timeout: Duration) -> ConnectivityResult {
    let start = Instant::now();

    let result = match tokio::time::timeout(timeout, lookup_host((host, 0))).await {
        Ok(Ok(mut addrs)) => {
            if addrs.next().is_some() {
                ConnectivityResult::reachable(host, start.elapsed())
            } else {
                ConnectivityResult::unreachable(host, "no addresses returned")
            }
        }
        Ok(Err(e)) => ConnectivityResult::unreachable(host, e.to_string()),
        Err(_) => ConnectivityResult::unreachable(
            host,
            format!("lookup timed out after {}ms", timeout.as_millis()),
        ),
    };

    debug!(host = %host, status = ?result.status, "Connectivity probe finished");
    result
}
