//! Mediagate Core Library
//!
//! This crate provides the domain model, error types, configuration, and key
//! helpers shared by every Mediagate component: the coordination store, the
//! object store, the moderation services, and the queue worker.

pub mod config;
pub mod constants;
pub mod error;
pub mod keys;
pub mod models;
pub mod task_error;

// Re-export commonly used types
pub use config::{ClamAvConfig, Config, CoordinationBackend, StalePolicy, SweepConfig, WorkerConfig};
pub use error::EventParseError;
pub use keys::{get_final_key, is_pending_scan, quarantine_key};
pub use models::{
    dedupe_labels, max_confidence, CoordinationRecord, Evidence, InboundMessage, LabelDetection,
    MessageOutcome, ModerationLabel, ModerationStatus, PendingObjectKey, ScanVerdict, ScannerKind,
    UploadEvent, VideoJobStatus, VideoModerationCallback, VirusVerdict,
};
pub use task_error::TaskError;
