//! hostwatch - host monitoring agent
//!
//! Samples the local host, learns per-metric baselines, raises and
//! remediates anomalies, and persists alerts and status reports under the
//! data directory.

use anyhow::{Context, Result};
use hostwatch_core::{
    collector::{MetricsCollector, SystemCollector},
    health::HealthRegistry,
    observability::{AgentMetrics, StructuredLogger},
    orchestrator::Orchestrator,
    response::ResponseExecutor,
    storage::ErrorLog,
    MonitorConfig,
};
use std::backtrace::Backtrace;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Panics on runtime threads reach their supervising task as a
/// `JoinError`, which records them in the error log
fn panic_is_supervised() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

/// Record unsupervised panics in the error log in addition to stderr
fn install_panic_hook(error_log: ErrorLog) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = Backtrace::force_capture().to_string();
        if panic_is_supervised() {
            error!(panic = %info, backtrace = %backtrace, "Task panicked");
        } else if let Err(e) = error_log.append(&info.to_string(), Some(&backtrace)) {
            eprintln!("failed to write error log: {e}");
        }
        default_hook(info);
    }));
}

/// Resolve on SIGINT or SIGTERM, returning the signal name
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => { res?; Ok("SIGINT") }
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting hostwatch");

    let agent_config = config::AgentConfig::load()?;
    let data_dir = agent_config.data_dir();
    data_dir.ensure().context("Failed to prepare data directory")?;
    install_panic_hook(data_dir.error_log());

    let monitor_config = MonitorConfig::load_or_init(&agent_config.monitor_config_path())?;
    info!(
        node_name = %agent_config.node_name,
        data_dir = %data_dir.root().display(),
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&agent_config.node_name);
    logger.log_startup(AGENT_VERSION, &data_dir.root().display().to_string());

    let query_timeout = Duration::from_millis(agent_config.query_timeout_ms);
    let collector: Arc<dyn MetricsCollector> = Arc::new(
        tokio::task::spawn_blocking(move || SystemCollector::new(query_timeout)).await?,
    );
    let executor =
        ResponseExecutor::for_host(&monitor_config, collector.clone(), logger.clone())?;

    let orchestrator = Arc::new(Orchestrator::new(
        monitor_config,
        &data_dir,
        collector,
        executor,
        health_registry.clone(),
        logger,
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let orchestrator_handle = tokio::spawn(Arc::clone(&orchestrator).run(shutdown_rx));

    // Start health, status and metrics server
    let app_state = Arc::new(api::AppState::new(
        health_registry,
        metrics,
        Arc::clone(&orchestrator),
    ));
    let api_handle = tokio::spawn(api::serve(agent_config.api_port, app_state));

    let reason = tokio::select! {
        signal = shutdown_signal() => format!("{} received", signal?),
        res = api_handle => match res {
            Ok(Ok(())) => "API server exited".to_string(),
            Ok(Err(e)) => {
                error!(error = %e, "API server failed");
                format!("API server failed: {e}")
            }
            Err(e) => format!("API server task aborted: {e}"),
        },
    };

    info!(reason = %reason, "Shutting down");
    let _ = shutdown_tx.send(());
    if let Err(e) = orchestrator_handle.await {
        error!(error = %e, "Orchestrator task ended abnormally");
    }
    orchestrator.final_report(&reason).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_outside_runtime_is_unsupervised() {
        assert!(!panic_is_supervised());
    }

    #[tokio::test]
    async fn test_panic_in_task_is_supervised() {
        assert!(tokio::spawn(async { panic_is_supervised() }).await.unwrap());
        assert!(tokio::task::spawn_blocking(panic_is_supervised).await.unwrap());
    }
}
