//! Object store abstraction trait
//!
//! Defines the operations the moderation pipeline performs on stored objects.

use async_trait::async_trait;
use mediagate_core::constants::MAX_TAG_VALUE_LEN;
use std::collections::HashMap;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Copy failed: {0}")]
    CopyFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Tagging failed: {0}")]
    TaggingFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A key/value tag attached to an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTag {
    pub key: String,
    pub value: String,
}

impl ObjectTag {
    /// Values longer than the tag limit are truncated on a character boundary.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: truncate_value(value.into()),
        }
    }
}

/// Cut `value` to [`MAX_TAG_VALUE_LEN`] bytes on a character boundary.
pub fn truncate_value(mut value: String) -> String {
    if value.len() > MAX_TAG_VALUE_LEN {
        let mut end = MAX_TAG_VALUE_LEN;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

/// Object store abstraction trait
///
/// Implementations must be safe to share across concurrent message handlers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Server-side copy. Fails with [`StorageError::NotFound`] when the source is absent.
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<()>;

    /// Server-side copy that replaces the destination's user metadata with `metadata`.
    async fn copy_object_with_metadata(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<()>;

    /// Delete an object. Deleting an absent object succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Replace the object's tag set.
    async fn put_object_tags(&self, bucket: &str, key: &str, tags: &[ObjectTag])
        -> StorageResult<()>;

    async fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// Size of an object in bytes.
    async fn content_length(&self, bucket: &str, key: &str) -> StorageResult<u64>;

    async fn download(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;
}
