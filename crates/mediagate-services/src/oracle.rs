//! Content classification via AWS Rekognition
//!
//! Images are classified synchronously from S3. Videos are classified by an
//! asynchronous job whose completion is published to an SNS topic and later
//! consumed by the video result processor.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_rekognition::types::{
    ContentModerationSortBy, Image, NotificationChannel, S3Object, Video,
};
use aws_sdk_rekognition::Client as RekognitionClient;
use mediagate_core::{LabelDetection, ModerationLabel};

/// One page of video moderation results.
#[derive(Debug, Clone, Default)]
pub struct ModerationPage {
    pub detections: Vec<LabelDetection>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    /// Fetch one page of a video moderation job's labels, sorted by timestamp.
    async fn get_moderation_page(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<ModerationPage>;

    async fn detect_image_labels(&self, bucket: &str, key: &str) -> Result<Vec<ModerationLabel>>;

    /// Start a video moderation job and return its id.
    async fn start_video_moderation(&self, bucket: &str, key: &str) -> Result<String>;
}

/// Drain every page of a video moderation job.
pub async fn fetch_all_detections(
    oracle: &dyn ClassificationOracle,
    job_id: &str,
) -> Result<Vec<LabelDetection>> {
    let mut detections = Vec::new();
    let mut next_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = oracle
            .get_moderation_page(job_id, next_token.as_deref())
            .await?;
        pages += 1;
        detections.extend(page.detections);

        match page.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => break,
        }
    }

    tracing::debug!(
        job_id = %job_id,
        pages,
        detections = detections.len(),
        "Fetched video moderation results"
    );
    Ok(detections)
}

/// SNS topic and IAM role Rekognition uses to announce job completion.
#[derive(Debug, Clone)]
pub struct VideoNotificationChannel {
    pub topic_arn: String,
    pub role_arn: String,
}

pub struct RekognitionOracle {
    client: RekognitionClient,
    min_confidence: f32,
    notification: Option<VideoNotificationChannel>,
}

impl RekognitionOracle {
    pub fn new(
        client: RekognitionClient,
        min_confidence: f32,
        notification: Option<VideoNotificationChannel>,
    ) -> Self {
        Self {
            client,
            min_confidence,
            notification,
        }
    }
}

fn to_label(label: &aws_sdk_rekognition::types::ModerationLabel) -> ModerationLabel {
    ModerationLabel {
        name: label.name().unwrap_or("Unknown").to_string(),
        confidence: label.confidence().unwrap_or(0.0),
        parent_category: label
            .parent_name()
            .filter(|p| !p.is_empty())
            .map(str::to_string),
    }
}

#[async_trait]
impl ClassificationOracle for RekognitionOracle {
    #[tracing::instrument(skip(self))]
    async fn get_moderation_page(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<ModerationPage> {
        let response = self
            .client
            .get_content_moderation()
            .job_id(job_id)
            .sort_by(ContentModerationSortBy::Timestamp)
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .context("Failed to get content moderation results")?;

        let detections = response
            .moderation_labels()
            .iter()
            .filter_map(|detection| {
                detection.moderation_label().map(|label| LabelDetection {
                    timestamp_ms: detection.timestamp(),
                    label: to_label(label),
                })
            })
            .collect();

        Ok(ModerationPage {
            detections,
            next_token: response.next_token().map(str::to_string),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn detect_image_labels(&self, bucket: &str, key: &str) -> Result<Vec<ModerationLabel>> {
        let image = Image::builder()
            .s3_object(S3Object::builder().bucket(bucket).name(key).build())
            .build();

        let response = self
            .client
            .detect_moderation_labels()
            .image(image)
            .min_confidence(self.min_confidence)
            .send()
            .await
            .context("Failed to detect moderation labels")?;

        Ok(response.moderation_labels().iter().map(to_label).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn start_video_moderation(&self, bucket: &str, key: &str) -> Result<String> {
        let channel = self
            .notification
            .as_ref()
            .context("Video moderation notification channel not configured")?;

        let notification_channel = NotificationChannel::builder()
            .sns_topic_arn(&channel.topic_arn)
            .role_arn(&channel.role_arn)
            .build()
            .context("Invalid video moderation notification channel")?;

        let video = Video::builder()
            .s3_object(S3Object::builder().bucket(bucket).name(key).build())
            .build();

        let response = self
            .client
            .start_content_moderation()
            .video(video)
            .min_confidence(self.min_confidence)
            .notification_channel(notification_channel)
            .send()
            .await
            .context("Failed to start content moderation job")?;

        let job_id = response
            .job_id()
            .ok_or_else(|| anyhow::anyhow!("No job ID returned"))?
            .to_string();

        tracing::info!(job_id = %job_id, "Started video moderation job");
        Ok(job_id)
    }
}
