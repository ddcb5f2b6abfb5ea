//! Browse the alert store

use anyhow::{Context, Result};
use hostwatch_core::anomaly::{AlertRecord, AnomalyKind, Severity};
use hostwatch_core::{AlertQuery, DataDir};
use serde::de::DeserializeOwned;
use tabled::Tabled;

use crate::output::{
    color_status, format_confidence, format_timestamp, print_json, print_rows, OutputFormat,
};

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&AlertRecord> for AlertRow {
    fn from(record: &AlertRecord) -> Self {
        Self {
            time: format_timestamp(&record.timestamp),
            kind: record.kind.to_string(),
            severity: color_status(record.severity.as_str()),
            confidence: format_confidence(record.confidence),
            message: record.message.clone(),
        }
    }
}

/// Parse a snake_case/lowercase label the way the stores serialize it
fn parse_label<T: DeserializeOwned>(value: &str, what: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .with_context(|| format!("Unknown {what}: {value}"))
}

pub fn build_query(
    severity: Option<&str>,
    kind: Option<&str>,
    limit: Option<usize>,
) -> Result<AlertQuery> {
    Ok(AlertQuery {
        severity: severity
            .map(|s| parse_label::<Severity>(s, "severity"))
            .transpose()?,
        kind: kind
            .map(|k| parse_label::<AnomalyKind>(k, "anomaly type"))
            .transpose()?,
        limit,
    })
}

/// List stored alerts, newest first
pub fn list_alerts(
    data_dir: &DataDir,
    severity: Option<&str>,
    kind: Option<&str>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let query = build_query(severity, kind, Some(limit))?;
    let records = data_dir.alert_store().list(&query)?;

    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Table => {
            print_rows(records.iter().map(AlertRow::from).collect());
            if !records.is_empty() {
                println!("\nShowing {} alerts", records.len());
            }
        }
    }

    Ok(())
}
