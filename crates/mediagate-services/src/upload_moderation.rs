//! Content moderation for new uploads.
//!
//! Images are classified inline and their verdict recorded straight away. Videos
//! start an asynchronous job whose verdict arrives through the video result queue.
//! Anything else has nothing to classify and passes moderation.

use crate::coordinator::{classify_confidence, Disposition, Evidence, ScanCoordinator};
use crate::error::ModerationError;
use crate::handler::MessageHandler;
use crate::oracle::ClassificationOracle;
use async_trait::async_trait;
use mediagate_core::constants::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
use mediagate_core::keys::extension;
use mediagate_core::{
    dedupe_labels, InboundMessage, ModerationStatus, PendingObjectKey, ScanVerdict, TaskError,
    UploadEvent,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Image,
    Video,
    Other,
}

fn media_kind(key: &str) -> MediaKind {
    match extension(key) {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Image,
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
        _ => MediaKind::Other,
    }
}

pub struct UploadModerationHandler {
    coordinator: Arc<ScanCoordinator>,
    oracle: Arc<dyn ClassificationOracle>,
    video_moderation_enabled: bool,
}

impl UploadModerationHandler {
    pub fn new(
        coordinator: Arc<ScanCoordinator>,
        oracle: Arc<dyn ClassificationOracle>,
        video_moderation_enabled: bool,
    ) -> Self {
        Self {
            coordinator,
            oracle,
            video_moderation_enabled,
        }
    }

    /// Moderate one upload. Returns `None` while a video job is in flight.
    #[tracing::instrument(skip(self), fields(bucket = %event.bucket, key = %event.key))]
    pub async fn moderate(
        &self,
        event: &UploadEvent,
    ) -> Result<Option<Disposition>, ModerationError> {
        let key = PendingObjectKey::new(event.bucket.as_str(), event.key.as_str());

        match media_kind(&event.key) {
            MediaKind::Image => {
                let labels = self
                    .oracle
                    .detect_image_labels(&event.bucket, &event.key)
                    .await
                    .map_err(ModerationError::Oracle)?;
                let evidence = Evidence::labels(dedupe_labels(labels));
                let status = classify_confidence(evidence.max_confidence(), ModerationStatus::Passed);
                tracing::info!(
                    labels = evidence.labels.len(),
                    max_confidence = ?evidence.max_confidence(),
                    status = %status,
                    "Image moderation classified"
                );
                let disposition = self
                    .coordinator
                    .settle(&key, ScanVerdict::Moderation(status), evidence)
                    .await?;
                Ok(Some(disposition))
            }
            MediaKind::Video if self.video_moderation_enabled => {
                let job_id = self
                    .oracle
                    .start_video_moderation(&event.bucket, &event.key)
                    .await
                    .map_err(ModerationError::Oracle)?;
                tracing::info!(job_id = %job_id, "Video moderation job started");
                Ok(None)
            }
            MediaKind::Video => {
                tracing::warn!("Video moderation not configured, holding video for manual review");
                let disposition = self
                    .coordinator
                    .settle(
                        &key,
                        ScanVerdict::Moderation(ModerationStatus::UnderReview),
                        Evidence::details("Video moderation not configured"),
                    )
                    .await?;
                Ok(Some(disposition))
            }
            MediaKind::Other => {
                tracing::debug!("Nothing to classify, passing moderation");
                let disposition = self
                    .coordinator
                    .settle(
                        &key,
                        ScanVerdict::Moderation(ModerationStatus::Passed),
                        Evidence::default(),
                    )
                    .await?;
                Ok(Some(disposition))
            }
        }
    }
}

#[async_trait]
impl MessageHandler for UploadModerationHandler {
    fn name(&self) -> &'static str {
        "upload-moderation"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<(), TaskError> {
        let events = UploadEvent::parse_all(&message.body)?;
        if events.is_empty() {
            tracing::debug!(message_id = %message.message_id, "No uploads in message");
        }
        for event in &events {
            self.moderate(event).await?;
        }
        Ok(())
    }
}
