use crate::traits::{ObjectStore, ObjectTag, StorageError, StorageResult};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::{HeadObjectError, HeadObjectOutput};
use aws_sdk_s3::types::{MetadataDirective, Tag, Tagging};
use aws_sdk_s3::Client;
use std::collections::HashMap;

/// S3 object store implementation
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from shared AWS configuration.
    ///
    /// # Arguments
    /// * `sdk_config` - Loaded AWS configuration (region, credentials, retry policy)
    /// * `endpoint_url` - Optional custom endpoint for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub fn from_sdk_config(sdk_config: &SdkConfig, endpoint_url: Option<&str>) -> Self {
        let mut builder = aws_sdk_s3::config::Builder::from(sdk_config);
        if let Some(endpoint) = endpoint_url {
            // Path-style addressing is required by MinIO and most S3-compatible providers
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self::new(Client::from_conf(builder.build()))
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<HeadObjectOutput>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(Some(output)),
            Err(SdkError::ServiceError(service_err))
                if matches!(service_err.err(), HeadObjectError::NotFound(_)) =>
            {
                Ok(None)
            }
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    /// Server-side copy. With `metadata`, the destination's user metadata is
    /// replaced instead of copied from the source.
    async fn copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: Option<&HashMap<String, String>>,
    ) -> StorageResult<()> {
        let start = std::time::Instant::now();

        // URL-encode the copy source per AWS S3 API requirements
        let copy_source = format!("{}/{}", source_bucket, urlencoding::encode(source_key));

        let mut request = self
            .client
            .copy_object()
            .bucket(dest_bucket)
            .key(dest_key)
            .copy_source(&copy_source);
        if let Some(metadata) = metadata {
            request = request
                .metadata_directive(MetadataDirective::Replace)
                .set_metadata(Some(metadata.clone()));
        }

        request.send().await.map_err(|e| {
            if e.code() == Some("NoSuchKey") {
                return StorageError::NotFound(format!("{}/{}", source_bucket, source_key));
            }
            tracing::error!(
                error = %e,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 copy failed"
            );
            StorageError::CopyFailed(e.to_string())
        })?;

        tracing::info!(
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 copy successful"
        );

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[tracing::instrument(skip(self))]
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        self.copy(source_bucket, source_key, dest_bucket, dest_key, None)
            .await
    }

    #[tracing::instrument(skip(self, metadata), fields(metadata_count = metadata.len()))]
    async fn copy_object_with_metadata(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<()> {
        self.copy(
            source_bucket,
            source_key,
            dest_bucket,
            dest_key,
            Some(metadata),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                StorageError::DeleteFailed(e.to_string())
            })?;

        tracing::info!(
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    #[tracing::instrument(skip(self, tags), fields(tag_count = tags.len()))]
    async fn put_object_tags(
        &self,
        bucket: &str,
        key: &str,
        tags: &[ObjectTag],
    ) -> StorageResult<()> {
        let tag_set = tags
            .iter()
            .map(|t| {
                Tag::builder()
                    .key(&t.key)
                    .value(&t.value)
                    .build()
                    .map_err(|e| StorageError::TaggingFailed(e.to_string()))
            })
            .collect::<StorageResult<Vec<Tag>>>()?;

        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|e| StorageError::TaggingFailed(e.to_string()))?;

        self.client
            .put_object_tagging()
            .bucket(bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| {
                if e.code() == Some("NoSuchKey") {
                    return StorageError::NotFound(format!("{}/{}", bucket, key));
                }
                tracing::error!(error = %e, "S3 tagging failed");
                StorageError::TaggingFailed(e.to_string())
            })?;

        tracing::debug!("S3 tags applied");
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        Ok(self.head(bucket, key).await?.is_some())
    }

    async fn content_length(&self, bucket: &str, key: &str) -> StorageResult<u64> {
        let output = self
            .head(bucket, key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))?;
        let length = output.content_length().unwrap_or(0);
        Ok(u64::try_from(length).unwrap_or(0))
    }

    #[tracing::instrument(skip(self))]
    async fn download(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let start = std::time::Instant::now();

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(service_err)
                    if matches!(service_err.err(), GetObjectError::NoSuchKey(_)) =>
                {
                    StorageError::NotFound(format!("{}/{}", bucket, key))
                }
                _ => {
                    tracing::error!(
                        error = %e,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "S3 download failed"
                    );
                    StorageError::DownloadFailed(e.to_string())
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        let bytes = data.into_bytes().to_vec();

        tracing::info!(
            size_bytes = bytes.len() as u64,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 download successful"
        );

        Ok(bytes)
    }
}
