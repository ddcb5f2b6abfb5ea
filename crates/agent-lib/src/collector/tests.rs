//! Tests for the collection plumbing
//!
//! Sub-query isolation is checked with synthetic blocking closures; the host
//! collector runs against the real machine with a fake procfs root.

use std::time::Duration;

use super::*;

#[tokio::test]
async fn test_run_blocking_returns_value() {
    let value = run_blocking("test", Duration::from_secs(1), || Ok(42))
        .await
        .unwrap();
    assert_eq!(value, 42);
}

#[tokio::test]
async fn test_run_blocking_reports_failure() {
    let err = run_blocking::<u32, _>("disk", Duration::from_secs(1), || {
        Err("permission denied".to_string())
    })
    .await
    .unwrap_err();

    assert!(matches!(err, CollectError::Failed { query: "disk", .. }));
    assert!(err.to_string().contains("permission denied"));
}

#[tokio::test]
async fn test_run_blocking_times_out() {
    let err = run_blocking("sockets", Duration::from_millis(50), || {
        std::thread::sleep(Duration::from_millis(500));
        Ok(())
    })
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        CollectError::Timeout {
            query: "sockets",
            timeout_ms: 50
        }
    ));
}

#[tokio::test]
async fn test_run_blocking_contains_panics() {
    let err = run_blocking::<(), _>("system", Duration::from_secs(1), || {
        panic!("sysinfo exploded")
    })
    .await
    .unwrap_err();
    assert!(matches!(err, CollectError::Aborted { .. }));
}

#[tokio::test]
async fn test_missing_socket_tables_degrade_sample() {
    let empty_proc = tempfile::TempDir::new().unwrap();
    let collector = SystemCollector::new(Duration::from_secs(5)).with_proc_root(empty_proc.path());

    let sample = collector.collect().await.unwrap();

    assert!(!sample.is_complete());
    assert!(sample
        .collection_warnings
        .iter()
        .any(|w| w.contains("sockets")));
    assert_eq!(sample.connections.established_count, 0);
    assert_eq!(sample.ports.open_count, 0);
    assert!(!sample.hostname.is_empty());
}

#[tokio::test]
async fn test_top_processes_bounded() {
    let collector = SystemCollector::new(Duration::from_secs(5)).with_top_processes(3);
    let sample = collector.collect().await.unwrap();

    assert!(sample.processes.top_by_cpu.len() <= 3);
    let cpus: Vec<f64> = sample
        .processes
        .top_by_cpu
        .iter()
        .map(|p| p.cpu_percent)
        .collect();
    assert!(cpus.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_back_to_back_collections_span_cpu_window() {
    let collector = SystemCollector::new(Duration::from_secs(5));

    // The first refresh happens after `start`, the second at least one
    // minimum CPU interval after the first
    let start = std::time::Instant::now();
    collector.collect().await.unwrap();
    collector.collect().await.unwrap();

    assert!(start.elapsed() >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
}
