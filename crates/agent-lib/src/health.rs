//! Health tracking
//!
//! Two separate notions live here:
//! - [`HealthRegistry`]: liveness of the agent's own components, served on
//!   `/healthz` and `/readyz`
//! - [`HealthAssessment`]: classification of the host's metrics against the
//!   configured thresholds, which drives the normal/critical mode switch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{ThresholdPair, Thresholds};
use crate::models::MetricSample;

/// Health status of an agent component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still operational, with errors worth looking at
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let statuses = components.values().map(|c| c.status);
        let mut overall = ComponentStatus::Healthy;
        for status in statuses {
            match status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => overall = ComponentStatus::Degraded,
                ComponentStatus::Healthy => {}
            }
        }
        overall
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick: Option<DateTime<Utc>>,
}

/// Component names for health tracking
pub mod components {
    pub const COLLECTOR: &str = "collector";
    pub const DETECTOR: &str = "detector";
    pub const RESPONDER: &str = "responder";
    pub const STORAGE: &str = "storage";

    pub const ALL: [&str; 4] = [COLLECTOR, DETECTOR, RESPONDER, STORAGE];
}

/// Shared registry of component health
///
/// The agent becomes ready once the first sampling tick has completed.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    last_tick: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every agent component as healthy
    pub async fn register_all(&self) {
        let mut map = self.components.write().await;
        for name in components::ALL {
            map.insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Record a completed sampling tick
    pub async fn mark_tick(&self) {
        *self.last_tick.write().await = Some(Utc::now());
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let last_tick = *self.last_tick.read().await;
        let health = self.health().await;

        let reason = if last_tick.is_none() {
            Some("No sampling tick completed yet".to_string())
        } else if health.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy".to_string())
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
            last_tick,
        }
    }
}

/// Position of a value relative to its warning/critical thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Normal,
    Warning,
    Critical,
}

impl MetricStatus {
    pub fn classify(value: f64, thresholds: &ThresholdPair) -> Self {
        if value >= thresholds.critical {
            MetricStatus::Critical
        } else if value >= thresholds.warning {
            MetricStatus::Warning
        } else {
            MetricStatus::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricStatus::Normal => "normal",
            MetricStatus::Warning => "warning",
            MetricStatus::Critical => "critical",
        }
    }
}

/// Result of one periodic health check of the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthAssessment {
    /// Worst of the per-metric statuses
    pub status: MetricStatus,
    pub checked_at: DateTime<Utc>,
    pub cpu: MetricStatus,
    pub memory: MetricStatus,
    pub disk: MetricStatus,
    pub connections: MetricStatus,
}

impl HealthAssessment {
    pub fn evaluate(sample: &MetricSample, thresholds: &Thresholds) -> Self {
        let cpu = MetricStatus::classify(sample.cpu.usage_percent, &thresholds.cpu);
        let memory = MetricStatus::classify(sample.memory.usage_percent, &thresholds.memory);
        let disk = MetricStatus::classify(sample.max_disk_usage(), &thresholds.disk);
        let connections = MetricStatus::classify(
            sample.connections.established_count as f64,
            &thresholds.connections,
        );

        let status = [cpu, memory, disk, connections]
            .into_iter()
            .max()
            .unwrap_or(MetricStatus::Normal);

        Self {
            status,
            checked_at: Utc::now(),
            cpu,
            memory,
            disk,
            connections,
        }
    }

    pub fn any_critical(&self) -> bool {
        self.status == MetricStatus::Critical
    }

    pub fn all_normal(&self) -> bool {
        self.status == MetricStatus::Normal
    }
}
