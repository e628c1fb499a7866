//! Mediagate Services Layer
//!
//! This crate is the moderation pipeline: it turns scanner reports into object
//! state. It hosts the scan coordinator (recording, decision, promotion and
//! quarantine), the queue message handlers for each scanner, the stale scan
//! sweep, and the clients for alerting, classification and virus scanning.

pub mod alert;
pub mod clamav;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod oracle;
pub mod sweep;
pub mod upload_moderation;
pub mod video;
pub mod virus_scan;

#[cfg(test)]
pub mod test_helpers;

pub use alert::{send_alert, Alert, AlertChannel, AlertType, LogAlertChannel, SnsAlertChannel};
#[cfg(feature = "clamav")]
pub use clamav::ClamAvScanner;
pub use clamav::{ScanResult, VirusScanner};
pub use coordinator::{
    classify_confidence, decide, Decision, Disposition, Evidence, QuarantineCause,
    QuarantineOutcome, QuarantineReason, ScanCoordinator, ScanOutcome,
};
pub use error::ModerationError;
pub use handler::MessageHandler;
pub use oracle::{
    fetch_all_detections, ClassificationOracle, ModerationPage, RekognitionOracle,
    VideoNotificationChannel,
};
pub use sweep::{StaleResolution, StaleScanSweeper, SweepReport};
pub use upload_moderation::UploadModerationHandler;
pub use video::VideoResultProcessor;
pub use virus_scan::VirusScanHandler;
