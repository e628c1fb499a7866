use super::{labels_json, QuarantineCause, ScanCoordinator};
use crate::alert::{send_alert, Alert, AlertType};
use crate::error::ModerationError;
use chrono::Utc;
use mediagate_core::constants::{
    ORIGINAL_BUCKET_METADATA, ORIGINAL_KEY_METADATA, QUARANTINE_DATE_METADATA,
    SCAN_RESULT_METADATA,
};
use mediagate_core::{
    max_confidence, quarantine_key, CoordinationRecord, Evidence, ModerationLabel,
    PendingObjectKey, ScannerKind,
};
use mediagate_storage::{truncate_value, StorageError};
use std::collections::HashMap;

/// Why an object is being quarantined, as reported in the alert.
#[derive(Debug, Clone, PartialEq)]
pub struct QuarantineReason {
    pub alert_type: AlertType,
    pub description: String,
    pub labels: Vec<ModerationLabel>,
    pub details: Option<String>,
}

impl QuarantineReason {
    pub fn new(alert_type: AlertType, description: impl Into<String>) -> Self {
        Self {
            alert_type,
            description: description.into(),
            labels: Vec::new(),
            details: None,
        }
    }

    pub fn from_cause(cause: QuarantineCause, evidence: &Evidence) -> Self {
        let (alert_type, description) = match cause {
            QuarantineCause::Virus => (AlertType::MalwareDetected, "virus detected"),
            QuarantineCause::Moderation => (
                AlertType::ContentQuarantined,
                "moderation labels above quarantine threshold",
            ),
        };
        Self {
            alert_type,
            description: description.to_string(),
            labels: evidence.labels.clone(),
            details: evidence.details.clone(),
        }
    }

    /// Reason for a complete record, citing the evidence stored with the verdict
    /// that caused the quarantine.
    pub fn for_record(cause: QuarantineCause, record: &CoordinationRecord) -> Self {
        let evidence = match cause {
            QuarantineCause::Virus => Evidence {
                labels: Vec::new(),
                details: record.virus_scan_details.clone(),
            },
            QuarantineCause::Moderation => Evidence::labels(record.moderation_labels.clone()),
        };
        Self::from_cause(cause, &evidence)
    }

    /// Scans did not complete in time.
    pub fn stale(missing: &[ScannerKind]) -> Self {
        let missing: Vec<&str> = missing.iter().map(ScannerKind::as_str).collect();
        Self::new(
            AlertType::StaleScan,
            format!("scan incomplete, missing: {}", missing.join(", ")),
        )
    }

    pub fn max_confidence(&self) -> Option<f32> {
        max_confidence(&self.labels)
    }

    /// User metadata for the quarantined copy.
    fn provenance(&self, bucket: &str, key: &str) -> HashMap<String, String> {
        let scan_result = self
            .details
            .clone()
            .unwrap_or_else(|| self.description.clone());
        HashMap::from([
            (ORIGINAL_BUCKET_METADATA.to_string(), bucket.to_string()),
            (ORIGINAL_KEY_METADATA.to_string(), key.to_string()),
            (SCAN_RESULT_METADATA.to_string(), truncate_value(scan_result)),
            (QUARANTINE_DATE_METADATA.to_string(), Utc::now().to_rfc3339()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuarantineOutcome {
    Quarantined { location: String },
    /// No quarantine bucket; the object was left untouched.
    NotConfigured,
    /// The object was already gone from both staging and quarantine.
    ObjectMissing,
}

impl ScanCoordinator {
    /// Move an object into the quarantine bucket under the moderation prefix.
    ///
    /// Copy (with provenance metadata), delete the original, alert, delete the
    /// coordination record. Alerting is best-effort. Without a quarantine bucket
    /// nothing is copied or deleted.
    #[tracing::instrument(skip(self, reason), fields(reason = %reason.description))]
    pub async fn quarantine_from_pending(
        &self,
        bucket: &str,
        pending_key: &str,
        reason: &QuarantineReason,
    ) -> Result<QuarantineOutcome, ModerationError> {
        let record_key = PendingObjectKey::new(bucket, pending_key);

        let Some(quarantine_bucket) = self.quarantine_bucket.as_deref() else {
            tracing::error!("QUARANTINE_BUCKET not configured, leaving object in place");
            send_alert(
                self.alerts.as_ref(),
                self.failure_alert(bucket, pending_key, reason, "QUARANTINE_BUCKET not configured"),
            )
            .await;
            return Ok(QuarantineOutcome::NotConfigured);
        };
        let dest_key = quarantine_key(pending_key);
        let location = format!("s3://{}/{}", quarantine_bucket, dest_key);
        let metadata = reason.provenance(bucket, pending_key);

        match self
            .objects
            .copy_object_with_metadata(
                bucket,
                pending_key,
                quarantine_bucket,
                &dest_key,
                &metadata,
            )
            .await
        {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                if self
                    .objects
                    .object_exists(quarantine_bucket, &dest_key)
                    .await?
                {
                    tracing::info!(location = %location, "Object already copied to quarantine");
                } else {
                    tracing::warn!("Object to quarantine no longer exists");
                    self.store.delete(&record_key).await?;
                    return Ok(QuarantineOutcome::ObjectMissing);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to copy object to quarantine");
                send_alert(
                    self.alerts.as_ref(),
                    self.failure_alert(bucket, pending_key, reason, &e.to_string()),
                )
                .await;
                return Err(e.into());
            }
        }

        if let Err(e) = self.objects.delete_object(bucket, pending_key).await {
            tracing::error!(error = %e, "Failed to delete quarantined original");
            send_alert(
                self.alerts.as_ref(),
                self.failure_alert(bucket, pending_key, reason, &e.to_string()),
            )
            .await;
            return Err(e.into());
        }

        let mut alert = Alert::new(reason.alert_type)
            .field("bucket", bucket)
            .field("key", pending_key)
            .field("reason", reason.description.as_str())
            .field("quarantine_location", location.as_str())
            .field("action", "File quarantined and deleted from source");
        if !reason.labels.is_empty() {
            alert = alert
                .field("labels", labels_json(&reason.labels))
                .field("max_confidence", reason.max_confidence());
        }
        if let Some(details) = reason.details.as_deref() {
            alert = alert.field("scan_result", details);
        }
        send_alert(self.alerts.as_ref(), alert).await;

        self.store.delete(&record_key).await?;

        tracing::warn!(location = %location, "Object quarantined");
        Ok(QuarantineOutcome::Quarantined { location })
    }

    fn failure_alert(
        &self,
        bucket: &str,
        key: &str,
        reason: &QuarantineReason,
        error: &str,
    ) -> Alert {
        let mut alert = Alert::new(AlertType::QuarantineFailed)
            .field("bucket", bucket)
            .field("key", key)
            .field("reason", reason.description.as_str())
            .field("error", error);
        if let Some(details) = reason.details.as_deref() {
            alert = alert.field("scan_result", details);
        }
        alert
    }
}
