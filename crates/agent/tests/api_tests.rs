//! Integration tests for the agent API endpoints

#[path = "../src/api.rs"]
#[allow(dead_code)]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use hostwatch_core::{
    collector::{async_trait, MetricsCollector},
    health::{components, HealthRegistry},
    observability::{AgentMetrics, StructuredLogger},
    orchestrator::Orchestrator,
    response::ResponseExecutor,
    DataDir, MetricSample, MonitorConfig,
};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// The API never samples the host itself
struct OfflineCollector;

#[async_trait]
impl MetricsCollector for OfflineCollector {
    async fn collect(&self) -> anyhow::Result<MetricSample> {
        anyhow::bail!("host sampling disabled in API tests")
    }
}

async fn setup_test_app() -> (Router, Arc<AppState>, TempDir) {
    let dir = TempDir::new().unwrap();
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let config = MonitorConfig::default();
    let logger = StructuredLogger::new("api-test");
    let collector: Arc<dyn MetricsCollector> = Arc::new(OfflineCollector);
    let executor = ResponseExecutor::for_host(&config, collector.clone(), logger.clone()).unwrap();
    let orchestrator = Arc::new(Orchestrator::new(
        config,
        &DataDir::new(dir.path()),
        collector,
        executor,
        health_registry.clone(),
        logger,
    ));

    let state = Arc::new(AppState::new(
        health_registry,
        AgentMetrics::new(),
        orchestrator,
    ));
    (create_router(state.clone()), state, dir)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["collector"].is_object());
    assert!(health["components"]["responder"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state, _dir) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::STORAGE, "alerts: disk full")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _dir) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::COLLECTOR, "sysinfo unavailable")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_waits_for_first_tick() {
    let (app, state, _dir) = setup_test_app().await;

    let (status, body) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    state.health_registry.mark_tick().await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ticking_but_unhealthy() {
    let (app, state, _dir) = setup_test_app().await;

    state.health_registry.mark_tick().await;
    state
        .health_registry
        .set_unhealthy(components::COLLECTOR, "Failed")
        .await;

    let (status, _) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_status_reports_mode_and_uptime() {
    let (app, _state, _dir) = setup_test_app().await;

    let (status, body) = get(app, "/status").await;
    assert_eq!(status, StatusCode::OK);

    let agent: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(agent["node"], "api-test");
    assert_eq!(agent["mode"], "normal");
    assert_eq!(agent["ticks"], 0);
    assert_eq!(agent["uptime"], "0d 0h 0m");
    assert!(agent["assessment"].is_null());
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state, _dir) = setup_test_app().await;

    state.metrics.observe_collection_latency(0.02);
    state.metrics.record_sample(1);
    state.metrics.inc_anomaly("cpu_spike", "critical");
    state.metrics.inc_action("cleanup_temp_files", "noop");

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let metrics_text = String::from_utf8(body).unwrap();
    assert!(metrics_text.contains("hostwatch_collection_latency_seconds_bucket"));
    assert!(metrics_text.contains("hostwatch_samples_collected_total"));
    assert!(metrics_text.contains("hostwatch_anomalies_detected_total"));
    assert!(metrics_text.contains("hostwatch_actions_executed_total"));
}
