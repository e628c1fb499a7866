use mediagate_core::constants::{FLAG_CONFIDENCE_THRESHOLD, QUARANTINE_CONFIDENCE_THRESHOLD};
use mediagate_core::{CoordinationRecord, ModerationStatus, VirusVerdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineCause {
    Virus,
    Moderation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Not every expected scanner has reported.
    Hold,
    Quarantine(QuarantineCause),
    /// Promote with this moderation tag.
    Promote(ModerationStatus),
}

/// Map the highest label confidence to a moderation status.
///
/// Both thresholds are strict: exactly 90 flags, exactly 70 passes.
/// `low_signal` is the status for content with labels below the flag threshold.
pub fn classify_confidence(
    max_confidence: Option<f32>,
    low_signal: ModerationStatus,
) -> ModerationStatus {
    match max_confidence {
        None => ModerationStatus::Passed,
        Some(c) if c > QUARANTINE_CONFIDENCE_THRESHOLD => ModerationStatus::Quarantine,
        Some(c) if c > FLAG_CONFIDENCE_THRESHOLD => ModerationStatus::UnderReview,
        Some(_) => low_signal,
    }
}

/// The virus verdict outranks the moderation verdict.
pub fn decide(record: &CoordinationRecord) -> Decision {
    if !record.is_complete() {
        return Decision::Hold;
    }
    if record.virus_scan_result == Some(VirusVerdict::Quarantine) {
        return Decision::Quarantine(QuarantineCause::Virus);
    }
    match record.moderation_result {
        Some(ModerationStatus::Quarantine) => Decision::Quarantine(QuarantineCause::Moderation),
        Some(status) => Decision::Promote(status),
        None => Decision::Promote(ModerationStatus::Passed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mediagate_core::{Evidence, PendingObjectKey, ScanVerdict};

    #[test]
    fn threshold_boundaries() {
        let low = ModerationStatus::PassedLowSignal;
        assert_eq!(classify_confidence(Some(70.0), low), low);
        assert_eq!(
            classify_confidence(Some(70.0001), low),
            ModerationStatus::UnderReview
        );
        assert_eq!(
            classify_confidence(Some(70.01), low),
            ModerationStatus::UnderReview
        );
        assert_eq!(
            classify_confidence(Some(90.0), low),
            ModerationStatus::UnderReview
        );
        assert_eq!(
            classify_confidence(Some(90.0001), low),
            ModerationStatus::Quarantine
        );
        assert_eq!(
            classify_confidence(Some(90.01), low),
            ModerationStatus::Quarantine
        );
    }

    #[test]
    fn no_labels_pass() {
        assert_eq!(
            classify_confidence(None, ModerationStatus::PassedLowSignal),
            ModerationStatus::Passed
        );
        assert_eq!(
            classify_confidence(Some(12.0), ModerationStatus::Passed),
            ModerationStatus::Passed
        );
    }

    fn record(verdicts: &[ScanVerdict]) -> CoordinationRecord {
        let mut record = CoordinationRecord::new(
            PendingObjectKey::new("b", "pending-scan/a.jpg"),
            2,
            Utc::now(),
        );
        for v in verdicts {
            record.merge(*v, &Evidence::default(), Utc::now());
        }
        record
    }

    #[test]
    fn incomplete_record_holds() {
        let rec = record(&[ScanVerdict::Virus(VirusVerdict::Quarantine)]);
        assert_eq!(decide(&rec), Decision::Hold);
    }

    #[test]
    fn virus_verdict_wins() {
        let rec = record(&[
            ScanVerdict::Moderation(ModerationStatus::Passed),
            ScanVerdict::Virus(VirusVerdict::Quarantine),
        ]);
        assert_eq!(decide(&rec), Decision::Quarantine(QuarantineCause::Virus));
    }

    #[test]
    fn moderation_quarantine() {
        let rec = record(&[
            ScanVerdict::Virus(VirusVerdict::Passed),
            ScanVerdict::Moderation(ModerationStatus::Quarantine),
        ]);
        assert_eq!(
            decide(&rec),
            Decision::Quarantine(QuarantineCause::Moderation)
        );
    }

    #[test]
    fn promotes_with_moderation_tag() {
        let rec = record(&[
            ScanVerdict::Virus(VirusVerdict::Passed),
            ScanVerdict::Moderation(ModerationStatus::UnderReview),
        ]);
        assert_eq!(
            decide(&rec),
            Decision::Promote(ModerationStatus::UnderReview)
        );
    }
}
