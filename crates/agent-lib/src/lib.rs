//! Core library for the hostwatch monitoring agent
//!
//! This crate provides the core functionality for:
//! - Host metrics collection (sysinfo and procfs)
//! - Statistical baselines and rule-based anomaly detection
//! - Automated remediation playbooks
//! - Alert, report and error log persistence
//! - Mode-aware scheduling of sampling, health checks and reports
//! - Health checks and observability

pub mod anomaly;
pub mod collector;
pub mod config;
pub mod connectivity;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod report;
pub mod response;
pub mod storage;

pub use config::MonitorConfig;
pub use health::{
    ComponentHealth, ComponentStatus, HealthAssessment, HealthRegistry, HealthResponse,
    MetricStatus, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use orchestrator::{AgentStatus, Mode, Orchestrator};
pub use report::StatusReport;
pub use storage::{AlertQuery, DataDir};
