use super::ScanCoordinator;
use crate::error::ModerationError;
use mediagate_core::{CoordinationRecord, Evidence, PendingObjectKey, ScanVerdict, VirusVerdict};

/// Result of merging one scanner report.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    /// This report is the one that completed the record.
    pub is_last_scanner: bool,
    pub should_quarantine: bool,
    /// First delivery from this scanner; its verdict and evidence are the ones kept.
    pub first_report: bool,
    pub record: CoordinationRecord,
}

impl ScanOutcome {
    pub fn from_record(record: CoordinationRecord, verdict: ScanVerdict) -> Self {
        let is_last_scanner =
            record.is_complete() && record.completed_by == Some(verdict.scanner());
        let should_quarantine =
            is_last_scanner && record.virus_scan_result == Some(VirusVerdict::Quarantine);
        let first_report = record.reports_from(verdict.scanner()) == 1;
        Self {
            is_last_scanner,
            should_quarantine,
            first_report,
            record,
        }
    }
}

impl ScanCoordinator {
    /// Merge a verdict into the object's coordination record in one atomic store call.
    pub async fn record_scan_result(
        &self,
        key: &PendingObjectKey,
        verdict: ScanVerdict,
        evidence: &Evidence,
    ) -> Result<ScanOutcome, ModerationError> {
        let record = self
            .store
            .record_verdict(key, verdict, evidence, self.expected_scan_count)
            .await?;
        Ok(ScanOutcome::from_record(record, verdict))
    }
}
