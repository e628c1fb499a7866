//! Scan coordination model: scanner kinds, verdicts and the per-object record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::keys::get_final_key;
use crate::models::label::{max_confidence, ModerationLabel};

/// The independent scanners that must report on every staged object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    Virus,
    Moderation,
}

impl ScannerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerKind::Virus => "virus",
            ScannerKind::Moderation => "moderation",
        }
    }
}

impl Display for ScannerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScannerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "virus" => Ok(ScannerKind::Virus),
            "moderation" => Ok(ScannerKind::Moderation),
            _ => Err(anyhow::anyhow!("Invalid scanner kind: {}", s)),
        }
    }
}

/// Virus scanner verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VirusVerdict {
    Passed,
    Quarantine,
}

impl VirusVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            VirusVerdict::Passed => "passed",
            VirusVerdict::Quarantine => "quarantine",
        }
    }
}

impl Display for VirusVerdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for VirusVerdict {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(VirusVerdict::Passed),
            "quarantine" => Ok(VirusVerdict::Quarantine),
            _ => Err(anyhow::anyhow!("Invalid virus verdict: {}", s)),
        }
    }
}

/// Moderation status, used both as the moderation scanner's verdict and as the
/// value of the `moderation-status` object tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    #[default]
    Passed,
    PassedLowSignal,
    UnderReview,
    Quarantine,
    VideoScanError,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Passed => "passed",
            ModerationStatus::PassedLowSignal => "passed_low_signal",
            ModerationStatus::UnderReview => "under_review",
            ModerationStatus::Quarantine => "quarantine",
            ModerationStatus::VideoScanError => "video_scan_error",
        }
    }
}

impl Display for ModerationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModerationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(ModerationStatus::Passed),
            "passed_low_signal" => Ok(ModerationStatus::PassedLowSignal),
            "under_review" => Ok(ModerationStatus::UnderReview),
            "quarantine" => Ok(ModerationStatus::Quarantine),
            "video_scan_error" => Ok(ModerationStatus::VideoScanError),
            _ => Err(anyhow::anyhow!("Invalid moderation status: {}", s)),
        }
    }
}

/// One scanner's report: which scanner, and what it concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    Virus(VirusVerdict),
    Moderation(ModerationStatus),
}

impl ScanVerdict {
    pub fn scanner(&self) -> ScannerKind {
        match self {
            ScanVerdict::Virus(_) => ScannerKind::Virus,
            ScanVerdict::Moderation(_) => ScannerKind::Moderation,
        }
    }
}

/// What a scanner saw alongside its verdict, carried into alerts and tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evidence {
    /// Deduplicated moderation labels.
    pub labels: Vec<ModerationLabel>,
    /// Free-form scanner output (virus signature, skip reason).
    pub details: Option<String>,
}

impl Evidence {
    pub fn labels(labels: Vec<ModerationLabel>) -> Self {
        Self {
            labels,
            details: None,
        }
    }

    pub fn details(details: impl Into<String>) -> Self {
        Self {
            labels: Vec::new(),
            details: Some(details.into()),
        }
    }

    pub fn max_confidence(&self) -> Option<f32> {
        max_confidence(&self.labels)
    }
}

/// Identifies a staged object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingObjectKey {
    pub bucket: String,
    pub staging_key: String,
}

impl PendingObjectKey {
    pub fn new(bucket: impl Into<String>, staging_key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            staging_key: staging_key.into(),
        }
    }

    /// Key the object occupies once promoted.
    pub fn final_key(&self) -> &str {
        get_final_key(&self.staging_key)
    }
}

impl Display for PendingObjectKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "s3://{}/{}", self.bucket, self.staging_key)
    }
}

/// Coordination state for one staged object.
///
/// Each scanner kind holds at most one verdict, and the scan count is derived from
/// the verdicts present, so a scanner can earn only one completion credit however
/// many times its report is delivered. The evidence of the first verdict per scanner
/// is kept so whichever report completes the record can cite it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationRecord {
    pub key: PendingObjectKey,
    pub expected_scan_count: u32,
    pub virus_scan_result: Option<VirusVerdict>,
    pub moderation_result: Option<ModerationStatus>,
    /// Scanner whose report brought the record to completion.
    pub completed_by: Option<ScannerKind>,
    /// Signature or skip reason that came with the stored virus verdict.
    #[serde(default)]
    pub virus_scan_details: Option<String>,
    /// Labels that came with the stored moderation verdict.
    #[serde(default)]
    pub moderation_labels: Vec<ModerationLabel>,
    /// Deliveries seen per scanner, duplicates included.
    #[serde(default)]
    pub virus_reports: u32,
    #[serde(default)]
    pub moderation_reports: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CoordinationRecord {
    pub fn new(key: PendingObjectKey, expected_scan_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            key,
            expected_scan_count,
            virus_scan_result: None,
            moderation_result: None,
            completed_by: None,
            virus_scan_details: None,
            moderation_labels: Vec::new(),
            virus_reports: 0,
            moderation_reports: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of distinct scanners that have reported.
    pub fn scan_count(&self) -> u32 {
        u32::from(self.virus_scan_result.is_some()) + u32::from(self.moderation_result.is_some())
    }

    pub fn is_complete(&self) -> bool {
        self.scan_count() >= self.expected_scan_count
    }

    pub fn has_verdict_from(&self, scanner: ScannerKind) -> bool {
        match scanner {
            ScannerKind::Virus => self.virus_scan_result.is_some(),
            ScannerKind::Moderation => self.moderation_result.is_some(),
        }
    }

    pub fn reports_from(&self, scanner: ScannerKind) -> u32 {
        match scanner {
            ScannerKind::Virus => self.virus_reports,
            ScannerKind::Moderation => self.moderation_reports,
        }
    }

    /// Merge one report into the record.
    ///
    /// The first verdict per scanner wins, together with its evidence; repeats only
    /// bump the report count and `updated_at`. `completed_by` is set by the report
    /// that completes the record and never changes.
    pub fn merge(&mut self, verdict: ScanVerdict, evidence: &Evidence, now: DateTime<Utc>) {
        match verdict {
            ScanVerdict::Virus(v) => {
                if self.virus_scan_result.is_none() {
                    self.virus_scan_result = Some(v);
                    self.virus_scan_details = evidence.details.clone();
                }
                self.virus_reports = self.virus_reports.saturating_add(1);
            }
            ScanVerdict::Moderation(m) => {
                if self.moderation_result.is_none() {
                    self.moderation_result = Some(m);
                    self.moderation_labels = evidence.labels.clone();
                }
                self.moderation_reports = self.moderation_reports.saturating_add(1);
            }
        }
        if self.completed_by.is_none() && self.is_complete() {
            self.completed_by = Some(verdict.scanner());
        }
        self.updated_at = now;
    }
}
