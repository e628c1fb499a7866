//! Virus scanning for new uploads.
//!
//! Files too large to scan, already-validated media, and deployments without a
//! scanner pass with a note in the scan details. Everything else is downloaded and
//! streamed through clamd.

use crate::alert::{send_alert, Alert, AlertType};
use crate::clamav::{ScanResult, VirusScanner};
use crate::coordinator::{Disposition, Evidence, ScanCoordinator};
use crate::error::ModerationError;
use crate::handler::MessageHandler;
use async_trait::async_trait;
use chrono::Utc;
use mediagate_core::constants::{
    VIRUS_SCAN_DATE_TAG, VIRUS_SCAN_DETAILS_TAG, VIRUS_SCAN_SKIP_EXTENSIONS, VIRUS_SCAN_TAG,
};
use mediagate_core::keys::extension;
use mediagate_core::{
    is_pending_scan, InboundMessage, PendingObjectKey, ScanVerdict, TaskError, UploadEvent,
    VirusVerdict,
};
use mediagate_storage::{ObjectTag, StorageError};
use std::sync::Arc;
use std::time::Instant;

const TOO_LARGE_DETAILS: &str = "File too large";
const MEDIA_FILE_DETAILS: &str = "Media file - basic validation";
const SCANNER_UNAVAILABLE_DETAILS: &str = "ClamAV not available";

pub struct VirusScanHandler {
    coordinator: Arc<ScanCoordinator>,
    scanner: Option<Arc<dyn VirusScanner>>,
    max_file_size_bytes: u64,
}

impl VirusScanHandler {
    /// `scanner` is `None` when ClamAV is disabled.
    pub fn new(
        coordinator: Arc<ScanCoordinator>,
        scanner: Option<Arc<dyn VirusScanner>>,
        max_file_size_bytes: u64,
    ) -> Self {
        Self {
            coordinator,
            scanner,
            max_file_size_bytes,
        }
    }

    /// Scan one upload. Returns `None` when the object no longer exists.
    #[tracing::instrument(skip(self), fields(bucket = %event.bucket, key = %event.key))]
    pub async fn scan_upload(
        &self,
        event: &UploadEvent,
    ) -> Result<Option<Disposition>, ModerationError> {
        let key = PendingObjectKey::new(event.bucket.as_str(), event.key.as_str());
        let objects = self.coordinator.objects();

        let size = if event.size > 0 {
            event.size
        } else {
            match objects.content_length(&event.bucket, &event.key).await {
                Ok(size) => size,
                Err(StorageError::NotFound(_)) => {
                    tracing::warn!("Object no longer exists, nothing to scan");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        };

        if size > self.max_file_size_bytes {
            tracing::warn!(
                size_bytes = size,
                max_bytes = self.max_file_size_bytes,
                "File too large to scan, skipping virus engine"
            );
            if !is_pending_scan(&event.key) {
                self.tag_skipped(&key).await?;
                return Ok(Some(Disposition::Tagged));
            }
            return self.pass(&key, TOO_LARGE_DETAILS).await.map(Some);
        }

        let skip_engine = extension(&event.key)
            .is_some_and(|ext| VIRUS_SCAN_SKIP_EXTENSIONS.contains(&ext.as_str()));
        if skip_engine {
            tracing::debug!("Media file, skipping virus engine");
            return self.pass(&key, MEDIA_FILE_DETAILS).await.map(Some);
        }

        let Some(scanner) = self.scanner.as_ref() else {
            tracing::warn!("ClamAV disabled, passing without scan");
            return self.pass(&key, SCANNER_UNAVAILABLE_DETAILS).await.map(Some);
        };

        let start = Instant::now();
        let data = match objects.download(&event.bucket, &event.key).await {
            Ok(data) => data,
            Err(StorageError::NotFound(_)) => {
                tracing::warn!("Object disappeared before download");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let result = scanner.scan(data).await;
        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            size_bytes = size,
            result = ?result,
            "Virus scan finished"
        );

        match result {
            ScanResult::Clean => self.pass(&key, "ClamAV: clean").await.map(Some),
            ScanResult::Infected(signature) => {
                tracing::warn!(virus = %signature, "Malware detected");
                self.coordinator
                    .settle(
                        &key,
                        ScanVerdict::Virus(VirusVerdict::Quarantine),
                        Evidence::details(format!("ClamAV: {}", signature)),
                    )
                    .await
                    .map(Some)
            }
            ScanResult::Error(message) => {
                let alert = Alert::new(AlertType::ScanError)
                    .field("bucket", event.bucket.as_str())
                    .field("key", event.key.as_str())
                    .field("error", message.as_str());
                send_alert(self.coordinator.alerts(), alert).await;
                Err(ModerationError::Scan(message))
            }
        }
    }

    async fn pass(
        &self,
        key: &PendingObjectKey,
        details: &str,
    ) -> Result<Disposition, ModerationError> {
        self.coordinator
            .settle(
                key,
                ScanVerdict::Virus(VirusVerdict::Passed),
                Evidence::details(details),
            )
            .await
    }

    async fn tag_skipped(&self, key: &PendingObjectKey) -> Result<(), ModerationError> {
        let tags = [
            ObjectTag::new(VIRUS_SCAN_TAG, "skipped"),
            ObjectTag::new(VIRUS_SCAN_DATE_TAG, Utc::now().to_rfc3339()),
            ObjectTag::new(VIRUS_SCAN_DETAILS_TAG, TOO_LARGE_DETAILS),
        ];
        self.coordinator
            .objects()
            .put_object_tags(&key.bucket, &key.staging_key, &tags)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for VirusScanHandler {
    fn name(&self) -> &'static str {
        "virus-scan"
    }

    async fn handle(&self, message: &InboundMessage) -> Result<(), TaskError> {
        let events = UploadEvent::parse_all(&message.body)?;
        for event in &events {
            self.scan_upload(event).await?;
        }
        Ok(())
    }
}
