//! Webhook notifications for admin and security alerts
//!
//! Handles:
//! - Formatting an anomaly as a JSON webhook payload
//! - Deduplication of identical notifications within a window

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::anomaly::{Anomaly, AnomalyKind, AnomalyMetrics, Severity};

/// Default deduplication window (15 minutes)
const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Who a notification is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Admin,
    SecurityTeam,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub timestamp: DateTime<Utc>,
    pub host: String,
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub message: String,
    pub metrics: AnomalyMetrics,
    pub audience: Audience,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// Same kind and audience already notified within the window
    Suppressed,
}

/// Posts anomalies to a webhook, suppressing repeats
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    host: String,
    dedup_window: Duration,
    recent: Mutex<HashMap<(AnomalyKind, Audience), Instant>>,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        host: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            host: host.into(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
            recent: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn should_suppress(&self, key: &(AnomalyKind, Audience)) -> bool {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent
            .get(key)
            .map(|sent| sent.elapsed() < self.dedup_window)
            .unwrap_or(false)
    }

    fn record(&self, key: (AnomalyKind, Audience)) {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.insert(key, Instant::now());
        recent.retain(|_, sent| sent.elapsed() < self.dedup_window);
    }

    pub fn payload(&self, anomaly: &Anomaly, audience: Audience) -> WebhookPayload {
        WebhookPayload {
            timestamp: Utc::now(),
            host: self.host.clone(),
            kind: anomaly.kind,
            severity: anomaly.severity,
            message: anomaly.message.clone(),
            metrics: anomaly.metrics.clone(),
            audience,
        }
    }

    /// Send unless an identical notification went out recently
    ///
    /// A failed delivery is not recorded, so the next attempt is not
    /// suppressed.
    pub async fn notify(
        &self,
        anomaly: &Anomaly,
        audience: Audience,
    ) -> Result<NotifyOutcome, reqwest::Error> {
        let key = (anomaly.kind, audience);
        if self.should_suppress(&key) {
            debug!(anomaly_type = %anomaly.kind, ?audience, "Duplicate notification suppressed");
            return Ok(NotifyOutcome::Suppressed);
        }

        self.client
            .post(&self.url)
            .json(&self.payload(anomaly, audience))
            .send()
            .await?
            .error_for_status()?;

        self.record(key);
        info!(anomaly_type = %anomaly.kind, ?audience, "Webhook notification sent");
        Ok(NotifyOutcome::Sent)
    }
}
