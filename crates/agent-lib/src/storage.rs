//! File-backed stores for alerts, reports and the error log
//!
//! Layout under the data directory:
//!
//! ```text
//! alerts/alert-<unix ms>-<seq>.json
//! reports/status-report-<rfc3339 with ':' and '.' as '-'>.json
//! logs/errors.log
//! config/monitor-config.json
//! ```
//!
//! Alert and report files are written once and never modified. Writers go
//! through a temporary file so readers never observe a half-written record.
//! Alert files are published without replacing an existing name, so a
//! restarted agent cannot overwrite alerts from an earlier run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::anomaly::{AlertRecord, AnomalyKind, Severity};
use crate::report::StatusReport;

const ALERTS_DIR: &str = "alerts";
const REPORTS_DIR: &str = "reports";
const LOGS_DIR: &str = "logs";
const CONFIG_DIR: &str = "config";
const CONFIG_FILE: &str = "monitor-config.json";
const ERROR_LOG_FILE: &str = "errors.log";

/// Names tried before an alert append gives up
const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Root of the agent's on-disk state
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn alerts_dir(&self) -> PathBuf {
        self.root.join(ALERTS_DIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join(REPORTS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.logs_dir().join(ERROR_LOG_FILE)
    }

    /// Create every store directory
    pub fn ensure(&self) -> Result<(), StoreError> {
        for dir in [
            self.alerts_dir(),
            self.reports_dir(),
            self.logs_dir(),
            self.root.join(CONFIG_DIR),
        ] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn alert_store(&self) -> AlertStore {
        AlertStore::new(self.alerts_dir())
    }

    pub fn report_store(&self) -> ReportStore {
        ReportStore::new(self.reports_dir())
    }

    pub fn error_log(&self) -> ErrorLog {
        ErrorLog::new(self.error_log_path())
    }
}

/// Write `value` as pretty JSON through a temp file in the same directory
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;
    let tmp = path.with_extension("json.tmp");

    fs::write(&tmp, content).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

/// Publish `content` at `path` only if nothing exists there yet
///
/// Fails with `AlreadyExists` when the name is taken.
fn publish_new(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    linked
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&content).map_err(|e| StoreError::json(path, e))
}

/// `.json` files in `dir` whose name starts with `prefix`, sorted by name
fn sorted_entries(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(prefix) && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Filter applied when listing alerts
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    pub severity: Option<Severity>,
    pub kind: Option<AnomalyKind>,
    pub limit: Option<usize>,
}

impl AlertQuery {
    fn matches(&self, record: &AlertRecord) -> bool {
        self.severity.map_or(true, |s| record.severity == s)
            && self.kind.map_or(true, |k| record.kind == k)
    }
}

/// Append-only store with one file per alert
#[derive(Debug)]
pub struct AlertStore {
    dir: PathBuf,
    seq: AtomicU64,
}

impl AlertStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Persist a record under a name unique within this store
    pub fn append(&self, record: &AlertRecord) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let content =
            serde_json::to_vec_pretty(record).map_err(|e| StoreError::json(&self.dir, e))?;
        let millis = record.timestamp.timestamp_millis();

        let mut path = self.dir.clone();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            path = self.dir.join(format!("alert-{millis}-{seq:06}.json"));
            match publish_new(&path, &content) {
                Ok(()) => return Ok(path),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        Err(StoreError::io(
            &path,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "no free alert file name"),
        ))
    }

    pub fn read(&self, path: &Path) -> Result<AlertRecord, StoreError> {
        read_json(path)
    }

    /// Matching alerts, newest first
    ///
    /// Unreadable files are skipped with a warning.
    pub fn list(&self, query: &AlertQuery) -> Result<Vec<AlertRecord>, StoreError> {
        let paths = sorted_entries(&self.dir, "alert-")?;
        let limit = query.limit.unwrap_or(usize::MAX);

        let mut records = Vec::new();
        for path in paths.iter().rev() {
            if records.len() >= limit {
                break;
            }
            match self.read(path) {
                Ok(record) if query.matches(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable alert record"),
            }
        }
        Ok(records)
    }
}

/// Listing entry for a stored report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub file_name: String,
    pub path: PathBuf,
}

/// Store of timestamped status reports
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn save(&self, report: &StatusReport) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let path = self.dir.join(report_file_name(report.timestamp));
        write_json_atomic(&path, report)?;
        Ok(path)
    }

    pub fn read(&self, path: &Path) -> Result<StatusReport, StoreError> {
        read_json(path)
    }

    /// Stored reports, newest first
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<ReportEntry>, StoreError> {
        let paths = sorted_entries(&self.dir, "status-report-")?;
        Ok(paths
            .into_iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .map(|path| ReportEntry {
                file_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path,
            })
            .collect())
    }

    pub fn latest(&self) -> Result<Option<StatusReport>, StoreError> {
        match self.list(Some(1))?.first() {
            Some(entry) => self.read(&entry.path).map(Some),
            None => Ok(None),
        }
    }
}

fn report_file_name(timestamp: DateTime<Utc>) -> String {
    let stamp = timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("status-report-{stamp}.json")
}

#[derive(Debug, Serialize)]
struct ErrorEntry<'a> {
    timestamp: String,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<&'a str>,
}

/// Append-only log of unexpected failures
///
/// Each line is `<rfc3339> - <json>`.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, error: &str, stack: Option<&str>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let entry = ErrorEntry {
            timestamp: timestamp.clone(),
            error,
            stack,
        };
        let json = serde_json::to_string(&entry).map_err(|e| StoreError::json(&self.path, e))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        writeln!(file, "{timestamp} - {json}").map_err(|e| StoreError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{Anomaly, AnomalyMetrics};
    use crate::config::Thresholds;
    use crate::models::fixtures;
    use crate::orchestrator::Mode;
    use tempfile::TempDir;

    fn record(kind: AnomalyKind, severity: Severity, message: &str) -> AlertRecord {
        let anomaly = Anomaly::rule(
            kind,
            severity,
            message,
            AnomalyMetrics {
                actual: 92.0,
                expected: Some(45.4),
                ..Default::default()
            },
        );
        AlertRecord::from_anomaly(&anomaly, "test-host", Utc::now())
    }

    #[test]
    fn test_alert_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = DataDir::new(dir.path()).alert_store();

        let original = record(
            AnomalyKind::CpuSpike,
            Severity::Critical,
            "CPU spike detected: 92.0% (avg: 45.4%) \u{2192} \"quoted\"",
        );
        let path = store.append(&original).unwrap();
        let loaded = store.read(&path).unwrap();

        assert_eq!(loaded.kind, original.kind);
        assert_eq!(loaded.severity, original.severity);
        assert_eq!(loaded.message, original.message);
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_alert_names_unique_within_same_millisecond() {
        let dir = TempDir::new().unwrap();
        let store = AlertStore::new(dir.path().join("alerts"));
        let r = record(AnomalyKind::HighLoad, Severity::Warning, "load");

        let first = store.append(&r).unwrap();
        let second = store.append(&r).unwrap();
        assert_ne!(first, second);
        assert_eq!(store.list(&AlertQuery::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_restarted_store_does_not_overwrite_alerts() {
        let dir = TempDir::new().unwrap();
        let r = record(AnomalyKind::HighLoad, Severity::Warning, "before restart");

        let first = AlertStore::new(dir.path()).append(&r).unwrap();

        // A new store starts its sequence from zero again
        let mut later = r.clone();
        later.message = "after restart".to_string();
        let second = AlertStore::new(dir.path()).append(&later).unwrap();

        assert_ne!(first, second);
        let store = AlertStore::new(dir.path());
        assert_eq!(store.read(&first).unwrap().message, "before restart");
        assert_eq!(store.read(&second).unwrap().message, "after restart");
        assert_eq!(store.list(&AlertQuery::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_alert_list_filters() {
        let dir = TempDir::new().unwrap();
        let store = AlertStore::new(dir.path());
        store
            .append(&record(AnomalyKind::CpuSpike, Severity::Critical, "a"))
            .unwrap();
        store
            .append(&record(AnomalyKind::HighLoad, Severity::Warning, "b"))
            .unwrap();
        store
            .append(&record(AnomalyKind::CpuSpike, Severity::Warning, "c"))
            .unwrap();
        fs::write(dir.path().join("alert-0-garbage.json"), "{not json").unwrap();

        let all = store.list(&AlertQuery::default()).unwrap();
        assert_eq!(all.len(), 3);

        let spikes = store
            .list(&AlertQuery {
                kind: Some(AnomalyKind::CpuSpike),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(spikes.len(), 2);

        let critical = store
            .list(&AlertQuery {
                severity: Some(Severity::Critical),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].message, "a");

        let limited = store
            .list(&AlertQuery {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_missing_store_lists_empty() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path().join("nope"));
        assert!(data.alert_store().list(&AlertQuery::default()).unwrap().is_empty());
        assert!(data.report_store().latest().unwrap().is_none());
    }

    #[test]
    fn test_report_save_and_latest() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        data.ensure().unwrap();
        let store = data.report_store();

        let mut older =
            StatusReport::new(&fixtures::sample(), &Thresholds::default(), Mode::Normal);
        older.timestamp = Utc::now() - chrono::Duration::minutes(5);
        store.save(&older).unwrap();

        let newer = StatusReport::new(
            &fixtures::with_cpu(95.0),
            &Thresholds::default(),
            Mode::Critical,
        )
        .with_shutdown_reason("SIGINT");
        let path = store.save(&newer).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("status-report-"));
        assert!(!name.trim_end_matches(".json").contains(':'));

        assert_eq!(store.list(None).unwrap().len(), 2);
        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.mode, Mode::Critical);
        assert_eq!(latest.shutdown_reason.as_deref(), Some("SIGINT"));
    }

    #[test]
    fn test_error_log_appends_lines() {
        let dir = TempDir::new().unwrap();
        let log = DataDir::new(dir.path()).error_log();

        log.append("boom", Some("at tick")).unwrap();
        log.append("second", None).unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let (stamp, json) = lines[0].split_once(" - ").unwrap();
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["error"], "boom");
        assert_eq!(value["stack"], "at tick");
    }
}
