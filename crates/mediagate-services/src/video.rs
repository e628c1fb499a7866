//! Video moderation result processing
//!
//! Consumes completion callbacks for asynchronous video moderation jobs, pulls every
//! page of detected labels and records the moderation verdict for the video.

use crate::coordinator::{classify_confidence, Disposition, Evidence, ScanCoordinator};
use crate::error::ModerationError;
use crate::handler::MessageHandler;
use crate::oracle::{fetch_all_detections, ClassificationOracle};
use async_trait::async_trait;
use mediagate_core::constants::START_CONTENT_MODERATION_API;
use mediagate_core::{
    dedupe_labels, InboundMessage, ModerationStatus, PendingObjectKey, ScanVerdict, TaskError,
    VideoJobStatus, VideoModerationCallback,
};
use std::sync::Arc;

pub struct VideoResultProcessor {
    coordinator: Arc<ScanCoordinator>,
    oracle: Arc<dyn ClassificationOracle>,
}

impl VideoResultProcessor {
    pub fn new(coordinator: Arc<ScanCoordinator>, oracle: Arc<dyn ClassificationOracle>) -> Self {
        Self {
            coordinator,
            oracle,
        }
    }

    /// Process one callback. Returns `None` when the callback is ignored or the job failed.
    #[tracing::instrument(
        skip(self, callback),
        fields(job_id = %callback.job_id, bucket = %callback.video.s3_bucket, key = %callback.video.s3_object_name)
    )]
    pub async fn process_callback(
        &self,
        callback: &VideoModerationCallback,
    ) -> Result<Option<Disposition>, ModerationError> {
        if callback.api != START_CONTENT_MODERATION_API {
            tracing::info!(api = %callback.api, "Ignoring callback for another API");
            return Ok(None);
        }

        let key = PendingObjectKey::new(
            callback.video.s3_bucket.as_str(),
            callback.video.s3_object_name.as_str(),
        );

        if callback.status != VideoJobStatus::Succeeded {
            tracing::warn!(status = ?callback.status, "Video moderation job did not succeed");
            self.coordinator.tag_scan_error(&key).await;
            return Ok(None);
        }

        match self.classify(&callback.job_id, &key).await {
            Ok(disposition) => Ok(Some(disposition)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to process video moderation result");
                self.coordinator.tag_scan_error(&key).await;
                Err(e)
            }
        }
    }

    async fn classify(
        &self,
        job_id: &str,
        key: &PendingObjectKey,
    ) -> Result<Disposition, ModerationError> {
        let detections = fetch_all_detections(self.oracle.as_ref(), job_id)
            .await
            .map_err(ModerationError::Oracle)?;
        let labels = dedupe_labels(detections.into_iter().map(|d| d.label));
        let evidence = Evidence::labels(labels);
        let status = classify_confidence(
            evidence.max_confidence(),
            ModerationStatus::PassedLowSignal,
        );

        tracing::info!(
            labels = evidence.labels.len(),
            max_confidence = ?evidence.max_confidence(),
            status = %status,
            "Video moderation classified"
        );

        self.coordinator
            .settle(key, ScanVerdict::Moderation(status), evidence)
            .await
    }
}

#[async_trait]
impl MessageHandler for VideoResultProcessor {
    fn name(&self) -> &'static str {
        "video-result"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<(), TaskError> {
        let callback = VideoModerationCallback::parse(&message.body)
            .inspect_err(|e| {
                tracing::warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Skipping malformed video moderation callback"
                )
            })?;
        self.process_callback(&callback).await?;
        Ok(())
    }
}
