//! Stale scan sweep
//!
//! Periodically resolves coordination records older than the configured threshold
//! so no staged object waits forever for a scanner that never reports.

use crate::alert::{send_alert, Alert, AlertType};
use crate::coordinator::{
    decide, Decision, Disposition, QuarantineCause, QuarantineOutcome, QuarantineReason,
    ScanCoordinator,
};
use crate::error::ModerationError;
use chrono::Utc;
use mediagate_core::constants::{MODERATION_SCANNED_AT_TAG, MODERATION_STATUS_TAG};
use mediagate_core::{
    CoordinationRecord, ModerationStatus, ScannerKind, StalePolicy, SweepConfig, VirusVerdict,
};
use mediagate_storage::ObjectTag;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::interval;

/// Records examined per sweep run.
const SWEEP_BATCH_LIMIT: i64 = 100;

/// How a stale record was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum StaleResolution {
    /// Complete record whose decision had not been carried out.
    Decided(Disposition),
    /// Staged object is gone; only the record was removed.
    Dropped,
    Quarantined(QuarantineOutcome),
    /// Tagged `under_review` in place and no longer tracked. Also used for records
    /// that call for quarantine when no quarantine bucket is configured.
    Escalated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub resolved: usize,
    pub failed: usize,
}

pub struct StaleScanSweeper {
    coordinator: Arc<ScanCoordinator>,
    config: SweepConfig,
}

impl StaleScanSweeper {
    pub fn new(coordinator: Arc<ScanCoordinator>, config: SweepConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Run the sweep every `interval` until `shutdown` flips to `true`.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval = interval(self.config.interval());
            sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = sweep_interval.tick() => {
                        match self.sweep_once().await {
                            Ok(report) if report.examined > 0 => tracing::info!(
                                examined = report.examined,
                                resolved = report.resolved,
                                failed = report.failed,
                                "Stale scan sweep completed"
                            ),
                            Ok(_) => tracing::debug!("No stale scans"),
                            Err(e) => tracing::error!(error = %e, "Stale scan sweep failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Stale scan sweep stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Resolve records older than the threshold, up to the batch limit.
    ///
    /// Records that fail to resolve are touched so the next run starts with the
    /// records it has not tried yet.
    #[tracing::instrument(skip(self), fields(policy = ?self.config.policy))]
    pub async fn sweep_once(&self) -> Result<SweepReport, ModerationError> {
        let cutoff = Utc::now()
            .checked_sub_signed(self.config.threshold())
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let records = self
            .coordinator
            .store()
            .list_stale(cutoff, SWEEP_BATCH_LIMIT)
            .await?;

        let mut report = SweepReport {
            examined: records.len(),
            ..SweepReport::default()
        };
        for record in &records {
            match self.resolve(record).await {
                Ok(resolution) => {
                    tracing::info!(
                        bucket = %record.key.bucket,
                        key = %record.key.staging_key,
                        resolution = ?resolution,
                        "Resolved stale scan"
                    );
                    report.resolved += 1;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        bucket = %record.key.bucket,
                        key = %record.key.staging_key,
                        "Failed to resolve stale scan"
                    );
                    report.failed += 1;
                    if let Err(e) = self.coordinator.store().touch(&record.key).await {
                        tracing::warn!(error = %e, "Failed to requeue stale scan");
                    }
                }
            }
        }
        Ok(report)
    }

    async fn resolve(
        &self,
        record: &CoordinationRecord,
    ) -> Result<StaleResolution, ModerationError> {
        let missing: Vec<ScannerKind> = [ScannerKind::Virus, ScannerKind::Moderation]
            .into_iter()
            .filter(|kind| !record.has_verdict_from(*kind))
            .collect();

        let reason = match decide(record) {
            Decision::Promote(_) => {
                let disposition = self.coordinator.execute(record).await?;
                return Ok(StaleResolution::Decided(disposition));
            }
            Decision::Quarantine(cause) => Some(QuarantineReason::for_record(cause, record)),
            Decision::Hold if record.virus_scan_result == Some(VirusVerdict::Quarantine) => {
                Some(QuarantineReason::for_record(QuarantineCause::Virus, record))
            }
            Decision::Hold if self.config.policy == StalePolicy::Quarantine => {
                Some(QuarantineReason::stale(&missing))
            }
            Decision::Hold => None,
        };

        let key = &record.key;
        if !self
            .coordinator
            .objects()
            .object_exists(&key.bucket, &key.staging_key)
            .await?
        {
            self.coordinator.store().delete(key).await?;
            return Ok(StaleResolution::Dropped);
        }

        match reason {
            Some(reason) if self.coordinator.quarantine_configured() => {
                let outcome = self
                    .coordinator
                    .quarantine_from_pending(&key.bucket, &key.staging_key, &reason)
                    .await?;
                Ok(StaleResolution::Quarantined(outcome))
            }
            Some(reason) => {
                tracing::warn!(
                    reason = %reason.description,
                    "QUARANTINE_BUCKET not configured, escalating stale scan instead"
                );
                self.escalate(record, &missing, Some(&reason)).await
            }
            None => self.escalate(record, &missing, None).await,
        }
    }

    /// Tag `under_review` where the object is, alert, and stop tracking it.
    async fn escalate(
        &self,
        record: &CoordinationRecord,
        missing: &[ScannerKind],
        unquarantined: Option<&QuarantineReason>,
    ) -> Result<StaleResolution, ModerationError> {
        let key = &record.key;
        let tags = [
            ObjectTag::new(MODERATION_STATUS_TAG, ModerationStatus::UnderReview.as_str()),
            ObjectTag::new(MODERATION_SCANNED_AT_TAG, Utc::now().to_rfc3339()),
        ];
        self.coordinator
            .objects()
            .put_object_tags(&key.bucket, &key.staging_key, &tags)
            .await?;

        let missing: Vec<&str> = missing.iter().map(ScannerKind::as_str).collect();
        let mut alert = Alert::new(AlertType::StaleScan)
            .field("bucket", key.bucket.as_str())
            .field("key", key.staging_key.as_str())
            .field("missing_scanners", missing)
            .field("created_at", record.created_at.to_rfc3339());
        alert = match unquarantined {
            Some(reason) => {
                let mut alert = alert
                    .field("reason", reason.description.as_str())
                    .field(
                        "action",
                        "QUARANTINE_BUCKET not configured, tagged under_review for manual review",
                    );
                if let Some(details) = reason.details.as_deref() {
                    alert = alert.field("scan_result", details);
                }
                alert
            }
            None => alert.field("action", "Tagged under_review for manual review"),
        };
        send_alert(self.coordinator.alerts(), alert).await;

        self.coordinator.store().delete(key).await?;
        Ok(StaleResolution::Escalated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Harness, QUARANTINE_BUCKET};
    use chrono::Duration;
    use mediagate_core::{Evidence, PendingObjectKey, ScanVerdict};
    use mediagate_db::CoordinationStore;

    const BUCKET: &str = "uploads";

    fn config(policy: StalePolicy) -> SweepConfig {
        SweepConfig {
            interval_secs: 60,
            threshold_secs: 3600,
            policy,
        }
    }

    async fn stale_record(harness: &Harness, key: &str, verdicts: &[ScanVerdict]) {
        stale_record_aged(harness, key, verdicts, Duration::hours(2)).await;
    }

    async fn stale_record_aged(
        harness: &Harness,
        key: &str,
        verdicts: &[ScanVerdict],
        age: Duration,
    ) {
        let created = Utc::now() - age;
        let mut record = CoordinationRecord::new(PendingObjectKey::new(BUCKET, key), 2, created);
        for verdict in verdicts {
            record.merge(*verdict, &Evidence::default(), created);
        }
        harness.store.insert(record).await;
    }

    fn sweeper(harness: &Harness, policy: StalePolicy) -> StaleScanSweeper {
        StaleScanSweeper::new(harness.shared_coordinator(), config(policy))
    }

    #[tokio::test]
    async fn quarantine_policy_quarantines_incomplete_scans() {
        let harness = Harness::new();
        harness.objects.put(BUCKET, "pending-scan/a.jpg", b"jpeg");
        stale_record(
            &harness,
            "pending-scan/a.jpg",
            &[ScanVerdict::Virus(VirusVerdict::Passed)],
        )
        .await;

        let report = sweeper(&harness, StalePolicy::Quarantine)
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(
            report,
            SweepReport {
                examined: 1,
                resolved: 1,
                failed: 0
            }
        );
        assert!(harness.objects.contains(QUARANTINE_BUCKET, "moderation/a.jpg"));
        let alerts = harness.alerts.of_type("STALE_SCAN");
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].json()["reason"],
            "scan incomplete, missing: moderation"
        );
        assert!(harness.store.is_empty().await);
    }

    #[tokio::test]
    async fn escalate_policy_tags_for_review() {
        let harness = Harness::new();
        harness.objects.put(BUCKET, "pending-scan/a.jpg", b"jpeg");
        stale_record(&harness, "pending-scan/a.jpg", &[]).await;

        sweeper(&harness, StalePolicy::Escalate)
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(
            harness
                .objects
                .tag_value(BUCKET, "pending-scan/a.jpg", "moderation-status"),
            Some("under_review".to_string())
        );
        let alerts = harness.alerts.of_type("STALE_SCAN");
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].json()["missing_scanners"],
            serde_json::json!(["virus", "moderation"])
        );
        assert!(harness.objects.copies().is_empty());
        assert!(harness.store.is_empty().await);
    }

    #[tokio::test]
    async fn escalate_policy_still_quarantines_detected_malware() {
        let harness = Harness::new();
        harness.objects.put(BUCKET, "pending-scan/a.exe", b"MZ");
        stale_record(
            &harness,
            "pending-scan/a.exe",
            &[ScanVerdict::Virus(VirusVerdict::Quarantine)],
        )
        .await;

        sweeper(&harness, StalePolicy::Escalate)
            .sweep_once()
            .await
            .unwrap();

        assert!(harness.objects.contains(QUARANTINE_BUCKET, "moderation/a.exe"));
        assert_eq!(harness.alerts.of_type("MALWARE_DETECTED").len(), 1);
    }

    #[tokio::test]
    async fn missing_object_only_drops_the_record() {
        let harness = Harness::new();
        stale_record(&harness, "pending-scan/gone.jpg", &[]).await;

        sweeper(&harness, StalePolicy::Quarantine)
            .sweep_once()
            .await
            .unwrap();

        assert!(harness.objects.mutations().is_empty());
        assert!(harness.alerts.published().is_empty());
        assert!(harness.store.is_empty().await);
    }

    #[tokio::test]
    async fn complete_record_is_decided() {
        let harness = Harness::new();
        harness.objects.put(BUCKET, "pending-scan/a.jpg", b"jpeg");
        stale_record(
            &harness,
            "pending-scan/a.jpg",
            &[
                ScanVerdict::Virus(VirusVerdict::Passed),
                ScanVerdict::Moderation(ModerationStatus::Passed),
            ],
        )
        .await;

        sweeper(&harness, StalePolicy::Quarantine)
            .sweep_once()
            .await
            .unwrap();

        assert!(harness.objects.contains(BUCKET, "a.jpg"));
        assert!(harness.store.is_empty().await);
    }

    #[tokio::test]
    async fn fresh_records_are_left_alone() {
        let harness = Harness::new();
        harness.objects.put(BUCKET, "pending-scan/a.jpg", b"jpeg");
        harness
            .record(
                PendingObjectKey::new(BUCKET, "pending-scan/a.jpg"),
                ScanVerdict::Virus(VirusVerdict::Passed),
            )
            .await;

        let report = sweeper(&harness, StalePolicy::Quarantine)
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(report.examined, 0);
        assert!(!harness.store.is_empty().await);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_sweep() {
        let harness = Harness::new();
        harness.objects.put(BUCKET, "pending-scan/a.jpg", b"jpeg");
        harness.objects.put(BUCKET, "pending-scan/b.jpg", b"jpeg");
        stale_record(&harness, "pending-scan/a.jpg", &[]).await;
        stale_record(&harness, "pending-scan/b.jpg", &[]).await;
        harness.objects.fail_tagging();

        let report = sweeper(&harness, StalePolicy::Escalate)
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(harness.store.len().await, 2);
    }

    #[tokio::test]
    async fn missing_quarantine_bucket_escalates_instead() {
        let harness = Harness::without_quarantine_bucket();
        harness.objects.put(BUCKET, "pending-scan/a.jpg", b"jpeg");
        harness.objects.put(BUCKET, "pending-scan/b.exe", b"MZ");
        stale_record(
            &harness,
            "pending-scan/a.jpg",
            &[ScanVerdict::Virus(VirusVerdict::Passed)],
        )
        .await;
        stale_record(
            &harness,
            "pending-scan/b.exe",
            &[
                ScanVerdict::Virus(VirusVerdict::Quarantine),
                ScanVerdict::Moderation(ModerationStatus::Passed),
            ],
        )
        .await;
        let sweeper = sweeper(&harness, StalePolicy::Quarantine);

        let report = sweeper.sweep_once().await.unwrap();

        assert_eq!(
            report,
            SweepReport {
                examined: 2,
                resolved: 2,
                failed: 0
            }
        );
        for key in ["pending-scan/a.jpg", "pending-scan/b.exe"] {
            assert_eq!(
                harness.objects.tag_value(BUCKET, key, "moderation-status"),
                Some("under_review".to_string())
            );
        }
        assert!(harness.objects.copies().is_empty());
        assert!(harness.alerts.of_type("QUARANTINE_FAILED").is_empty());
        let stale = harness.alerts.of_type("STALE_SCAN");
        assert_eq!(stale.len(), 2);
        assert!(stale
            .iter()
            .any(|a| a.json()["reason"] == "virus detected"));
        assert!(harness.store.is_empty().await);

        // Nothing is left to re-alert on.
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(harness.alerts.published().len(), 2);
    }

    #[tokio::test]
    async fn unresolvable_records_do_not_starve_newer_ones() {
        let harness = Harness::new();
        for i in 0..SWEEP_BATCH_LIMIT {
            let key = format!("pending-scan/stuck-{i}.jpg");
            harness.objects.put(BUCKET, &key, b"jpeg");
            stale_record(&harness, &key, &[]).await;
        }
        stale_record_aged(
            &harness,
            "pending-scan/gone.jpg",
            &[],
            Duration::minutes(90),
        )
        .await;
        harness.objects.fail_tagging();
        let sweeper = sweeper(&harness, StalePolicy::Escalate);

        let first = sweeper.sweep_once().await.unwrap();
        assert_eq!(first.examined, 100);
        assert_eq!(first.failed, 100);
        assert!(harness
            .store
            .get(&PendingObjectKey::new(BUCKET, "pending-scan/gone.jpg"))
            .await
            .unwrap()
            .is_some());

        let second = sweeper.sweep_once().await.unwrap();
        assert_eq!(second.resolved, 1);
        assert!(harness
            .store
            .get(&PendingObjectKey::new(BUCKET, "pending-scan/gone.jpg"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(harness.store.len().await, 100);
    }
}
