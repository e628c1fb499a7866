//! Scan coordination
//!
//! Scanner reports for staged objects are merged into a coordination record; the
//! report that completes the record runs the decision and executes promotion or
//! quarantine. Reports for objects outside the staging prefix are acted on
//! immediately.

mod decision;
mod promotion;
mod quarantine;
mod recorder;

pub use decision::{classify_confidence, decide, Decision, QuarantineCause};
pub use quarantine::{QuarantineOutcome, QuarantineReason};
pub use mediagate_core::Evidence;
pub use recorder::ScanOutcome;

use crate::alert::{send_alert, Alert, AlertChannel, AlertType};
use crate::error::ModerationError;
use chrono::Utc;
use mediagate_core::constants::{
    MODERATION_SCANNED_AT_TAG, MODERATION_STATUS_TAG, VIRUS_SCAN_DATE_TAG,
    VIRUS_SCAN_DETAILS_TAG, VIRUS_SCAN_TAG,
};
use mediagate_core::{
    is_pending_scan, max_confidence, CoordinationRecord, ModerationLabel, ModerationStatus,
    PendingObjectKey, ScanVerdict, VirusVerdict,
};
use mediagate_db::CoordinationStore;
use mediagate_storage::{ObjectStore, ObjectTag};
use std::sync::Arc;

/// How a scanner report was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Recorded; other scanners have not reported yet.
    Waiting,
    Promoted(ModerationStatus),
    Quarantined(QuarantineOutcome),
    /// Object outside the staging prefix, tagged where it is.
    Tagged,
    /// Late report for an object an earlier delivery already settled.
    Superseded,
}

/// Owns every side effect of turning scanner verdicts into object state.
pub struct ScanCoordinator {
    store: Arc<dyn CoordinationStore>,
    objects: Arc<dyn ObjectStore>,
    alerts: Arc<dyn AlertChannel>,
    quarantine_bucket: Option<String>,
    expected_scan_count: u32,
}

impl ScanCoordinator {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        objects: Arc<dyn ObjectStore>,
        alerts: Arc<dyn AlertChannel>,
        quarantine_bucket: Option<String>,
        expected_scan_count: u32,
    ) -> Self {
        Self {
            store,
            objects,
            alerts,
            quarantine_bucket,
            expected_scan_count,
        }
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn alerts(&self) -> &dyn AlertChannel {
        self.alerts.as_ref()
    }

    pub fn quarantine_configured(&self) -> bool {
        self.quarantine_bucket.is_some()
    }

    /// Apply one scanner's verdict for an object.
    #[tracing::instrument(skip(self, evidence), fields(bucket = %key.bucket, key = %key.staging_key))]
    pub async fn settle(
        &self,
        key: &PendingObjectKey,
        verdict: ScanVerdict,
        evidence: Evidence,
    ) -> Result<Disposition, ModerationError> {
        let flagged = verdict == ScanVerdict::Moderation(ModerationStatus::UnderReview);

        if !is_pending_scan(&key.staging_key) {
            if flagged {
                self.alert_flagged(key, &evidence.labels).await;
            }
            return self.settle_in_place(key, verdict, &evidence).await;
        }

        let outcome = self.record_scan_result(key, verdict, &evidence).await?;
        if flagged && outcome.first_report {
            // A fresh record for an object that is no longer staged comes from a
            // redelivery after the object was settled.
            if outcome.record.scan_count() == 1
                && !self
                    .objects
                    .object_exists(&key.bucket, &key.staging_key)
                    .await?
            {
                tracing::info!("Staged object already settled, dropping late report");
                self.store.delete(key).await?;
                return Ok(Disposition::Superseded);
            }
            self.alert_flagged(key, &outcome.record.moderation_labels).await;
        }

        if !outcome.is_last_scanner {
            tracing::info!(
                scanner = %verdict.scanner(),
                scan_count = outcome.record.scan_count(),
                expected = outcome.record.expected_scan_count,
                first_report = outcome.first_report,
                "Scan recorded, waiting for remaining scanners"
            );
            return Ok(Disposition::Waiting);
        }

        self.execute(&outcome.record).await
    }

    /// Run the decision for a complete record and carry it out.
    pub async fn execute(
        &self,
        record: &CoordinationRecord,
    ) -> Result<Disposition, ModerationError> {
        let key = &record.key;
        match decide(record) {
            Decision::Hold => Ok(Disposition::Waiting),
            Decision::Promote(tag) => {
                self.promote_object(&key.bucket, &key.staging_key, tag).await?;
                Ok(Disposition::Promoted(tag))
            }
            Decision::Quarantine(cause) => {
                let reason = QuarantineReason::for_record(cause, record);
                let outcome = self
                    .quarantine_from_pending(&key.bucket, &key.staging_key, &reason)
                    .await?;
                Ok(Disposition::Quarantined(outcome))
            }
        }
    }

    async fn settle_in_place(
        &self,
        key: &PendingObjectKey,
        verdict: ScanVerdict,
        evidence: &Evidence,
    ) -> Result<Disposition, ModerationError> {
        let cause = match verdict {
            ScanVerdict::Virus(VirusVerdict::Quarantine) => Some(QuarantineCause::Virus),
            ScanVerdict::Moderation(ModerationStatus::Quarantine) => {
                Some(QuarantineCause::Moderation)
            }
            _ => None,
        };

        if let Some(cause) = cause {
            let reason = QuarantineReason::from_cause(cause, evidence);
            let outcome = self
                .quarantine_from_pending(&key.bucket, &key.staging_key, &reason)
                .await?;
            return Ok(Disposition::Quarantined(outcome));
        }

        let now = Utc::now().to_rfc3339();
        let tags = match verdict {
            ScanVerdict::Moderation(status) => vec![
                ObjectTag::new(MODERATION_STATUS_TAG, status.as_str()),
                ObjectTag::new(MODERATION_SCANNED_AT_TAG, now),
            ],
            ScanVerdict::Virus(_) => {
                let mut tags = vec![
                    ObjectTag::new(VIRUS_SCAN_TAG, "clean"),
                    ObjectTag::new(VIRUS_SCAN_DATE_TAG, now),
                ];
                if let Some(details) = evidence.details.as_deref() {
                    tags.push(ObjectTag::new(VIRUS_SCAN_DETAILS_TAG, details));
                }
                tags
            }
        };
        self.objects
            .put_object_tags(&key.bucket, &key.staging_key, &tags)
            .await?;

        tracing::info!(scanner = %verdict.scanner(), "Tagged object in place");
        Ok(Disposition::Tagged)
    }

    /// Tag `video_scan_error` on an object. Failures are logged and ignored.
    pub async fn tag_scan_error(&self, key: &PendingObjectKey) {
        let tags = [
            ObjectTag::new(
                MODERATION_STATUS_TAG,
                ModerationStatus::VideoScanError.as_str(),
            ),
            ObjectTag::new(MODERATION_SCANNED_AT_TAG, Utc::now().to_rfc3339()),
        ];
        if let Err(e) = self
            .objects
            .put_object_tags(&key.bucket, &key.staging_key, &tags)
            .await
        {
            tracing::warn!(
                error = %e,
                bucket = %key.bucket,
                key = %key.staging_key,
                "Failed to tag video_scan_error"
            );
        }
    }

    async fn alert_flagged(&self, key: &PendingObjectKey, labels: &[ModerationLabel]) {
        let alert = Alert::new(AlertType::ContentFlagged)
            .field("bucket", key.bucket.as_str())
            .field("key", key.staging_key.as_str())
            .field("labels", labels_json(labels))
            .field("max_confidence", max_confidence(labels))
            .field("action", "Tagged under_review for manual review");
        send_alert(self.alerts.as_ref(), alert).await;
    }
}

pub(crate) fn labels_json(labels: &[ModerationLabel]) -> serde_json::Value {
    serde_json::to_value(labels).unwrap_or_default()
}
