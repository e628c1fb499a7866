//! Key prefixes, tag names and moderation thresholds.

/// Prefix under which uploads wait for both scanners to report.
pub const PENDING_SCAN_PREFIX: &str = "pending-scan/";

/// Prefix for objects moved into the quarantine bucket.
pub const QUARANTINE_PREFIX: &str = "moderation/";

/// Tag holding the moderation status of an object.
pub const MODERATION_STATUS_TAG: &str = "moderation-status";

/// Tag holding the RFC 3339 time the moderation decision was applied.
pub const MODERATION_SCANNED_AT_TAG: &str = "moderation-scanned-at";

/// Tag written by the virus scanner on objects outside the staging prefix.
pub const VIRUS_SCAN_TAG: &str = "virus-scan";

/// Tag holding the time of the virus scan.
pub const VIRUS_SCAN_DATE_TAG: &str = "scan-date";

/// Tag with free-form virus scan details (truncated).
pub const VIRUS_SCAN_DETAILS_TAG: &str = "scan-details";

/// S3 tag values are limited to 256 characters.
pub const MAX_TAG_VALUE_LEN: usize = 256;

/// User metadata written on quarantined copies, tracing them back to the upload.
pub const ORIGINAL_BUCKET_METADATA: &str = "original-bucket";
pub const ORIGINAL_KEY_METADATA: &str = "original-key";
pub const SCAN_RESULT_METADATA: &str = "scan-result";
pub const QUARANTINE_DATE_METADATA: &str = "quarantine-date";

/// Labels strictly above this confidence quarantine the object.
pub const QUARANTINE_CONFIDENCE_THRESHOLD: f32 = 90.0;

/// Labels strictly above this confidence (and not above the quarantine
/// threshold) flag the object for review.
pub const FLAG_CONFIDENCE_THRESHOLD: f32 = 70.0;

/// `API` value of video moderation completion callbacks.
pub const START_CONTENT_MODERATION_API: &str = "StartContentModeration";

/// Number of independent scanners (virus + moderation).
pub const SCANNER_COUNT: u32 = 2;

/// Extensions already validated as media; the virus engine is skipped for these.
pub const VIRUS_SCAN_SKIP_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "avif", "mp4", "mov", "webm", "m4v",
    "avi", "mp3", "m4a", "wav", "aac", "flac", "ogg",
];

/// Extensions classified synchronously with image moderation.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "avif"];

/// Extensions classified with an asynchronous video moderation job.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "m4v", "avi"];
