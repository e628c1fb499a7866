//! Security alerting
//!
//! Alerts are best-effort: [`send_alert`] logs publish failures and never returns
//! them, so an alerting outage cannot stall quarantine or promotion.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use chrono::Utc;
use serde_json::{json, Map, Value};

const SUBJECT_PREFIX: &str = "[SECURITY ALERT]";

/// SNS rejects subjects longer than 100 characters.
const MAX_SUBJECT_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    MalwareDetected,
    ContentQuarantined,
    ContentFlagged,
    QuarantineFailed,
    StaleScan,
    ScanError,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::MalwareDetected => "MALWARE_DETECTED",
            AlertType::ContentQuarantined => "CONTENT_QUARANTINED",
            AlertType::ContentFlagged => "CONTENT_FLAGGED",
            AlertType::QuarantineFailed => "QUARANTINE_FAILED",
            AlertType::StaleScan => "STALE_SCAN",
            AlertType::ScanError => "SCAN_ERROR",
        }
    }
}

/// An alert under construction: a type plus arbitrary JSON fields.
#[derive(Debug, Clone)]
pub struct Alert {
    pub alert_type: AlertType,
    fields: Map<String, Value>,
}

impl Alert {
    pub fn new(alert_type: AlertType) -> Self {
        Self {
            alert_type,
            fields: Map::new(),
        }
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn subject(&self) -> String {
        let subject = format!("{} {}", SUBJECT_PREFIX, self.alert_type.as_str());
        subject.chars().take(MAX_SUBJECT_LEN).collect()
    }

    /// JSON body: `type`, `timestamp`, then the alert's own fields.
    pub fn body(&self) -> String {
        let mut body = Map::new();
        body.insert("type".to_string(), json!(self.alert_type.as_str()));
        body.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        for (name, value) in &self.fields {
            body.insert(name.clone(), value.clone());
        }
        serde_json::to_string_pretty(&Value::Object(body)).unwrap_or_default()
    }
}

#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn publish(&self, subject: &str, message: &str) -> Result<()>;
}

/// Publish `alert`, logging instead of returning any failure.
pub async fn send_alert(channel: &dyn AlertChannel, alert: Alert) {
    let subject = alert.subject();
    match channel.publish(&subject, &alert.body()).await {
        Ok(()) => tracing::info!(alert_type = alert.alert_type.as_str(), "Alert sent"),
        Err(e) => tracing::error!(
            error = %e,
            alert_type = alert.alert_type.as_str(),
            "Failed to send alert"
        ),
    }
}

/// Publishes alerts to an SNS topic.
#[derive(Clone)]
pub struct SnsAlertChannel {
    client: SnsClient,
    topic_arn: String,
}

impl SnsAlertChannel {
    pub fn new(client: SnsClient, topic_arn: String) -> Self {
        Self { client, topic_arn }
    }
}

#[async_trait]
impl AlertChannel for SnsAlertChannel {
    async fn publish(&self, subject: &str, message: &str) -> Result<()> {
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(subject)
            .message(message)
            .send()
            .await
            .context("Failed to publish SNS alert")?;
        Ok(())
    }
}

/// Writes alerts to the log when no topic is configured.
#[derive(Debug, Default, Clone)]
pub struct LogAlertChannel;

#[async_trait]
impl AlertChannel for LogAlertChannel {
    async fn publish(&self, subject: &str, message: &str) -> Result<()> {
        tracing::warn!(subject = %subject, message = %message, "Alert (no topic configured)");
        Ok(())
    }
}
