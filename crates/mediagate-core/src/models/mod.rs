pub mod event;
pub mod label;
pub mod scan;

pub use event::{
    InboundMessage, MessageOutcome, UploadEvent, VideoJobStatus, VideoLocation,
    VideoModerationCallback,
};
pub use label::{dedupe_labels, max_confidence, LabelDetection, ModerationLabel};
pub use scan::{
    CoordinationRecord, Evidence, ModerationStatus, PendingObjectKey, ScanVerdict, ScannerKind,
    VirusVerdict,
};
