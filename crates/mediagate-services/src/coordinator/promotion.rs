use super::ScanCoordinator;
use crate::error::ModerationError;
use chrono::Utc;
use mediagate_core::constants::{MODERATION_SCANNED_AT_TAG, MODERATION_STATUS_TAG};
use mediagate_core::{get_final_key, is_pending_scan, ModerationStatus, PendingObjectKey};
use mediagate_storage::{ObjectTag, StorageError};

impl ScanCoordinator {
    /// Move a staged object to its final key.
    ///
    /// Copy, tag, delete the staging object, delete the coordination record. Tagging
    /// is best-effort; every other step must succeed before the next one runs.
    /// Re-running after a partial failure is safe.
    #[tracing::instrument(skip(self), fields(tag = %tag))]
    pub async fn promote_object(
        &self,
        bucket: &str,
        pending_key: &str,
        tag: ModerationStatus,
    ) -> Result<(), ModerationError> {
        if !is_pending_scan(pending_key) {
            return Err(ModerationError::InvalidInput(format!(
                "cannot promote {} (not under the staging prefix)",
                pending_key
            )));
        }
        let final_key = get_final_key(pending_key);
        let record_key = PendingObjectKey::new(bucket, pending_key);

        match self
            .objects
            .copy_object(bucket, pending_key, bucket, final_key)
            .await
        {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                if self.objects.object_exists(bucket, final_key).await? {
                    tracing::info!(final_key = %final_key, "Staging copy already promoted");
                } else {
                    tracing::warn!(
                        final_key = %final_key,
                        "Staged object no longer exists, dropping coordination record"
                    );
                    self.store.delete(&record_key).await?;
                    return Ok(());
                }
            }
            Err(e) => return Err(e.into()),
        }

        let tags = [
            ObjectTag::new(MODERATION_STATUS_TAG, tag.as_str()),
            ObjectTag::new(MODERATION_SCANNED_AT_TAG, Utc::now().to_rfc3339()),
        ];
        if let Err(e) = self.objects.put_object_tags(bucket, final_key, &tags).await {
            tracing::warn!(error = %e, final_key = %final_key, "Failed to tag promoted object");
        }

        self.objects.delete_object(bucket, pending_key).await?;

        if !self.store.delete(&record_key).await? {
            tracing::debug!("Coordination record already removed");
        }

        tracing::info!(final_key = %final_key, "Object promoted");
        Ok(())
    }
}
