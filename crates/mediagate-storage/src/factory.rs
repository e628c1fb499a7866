#[cfg(feature = "storage-s3")]
use crate::S3ObjectStore;
use crate::{ObjectStore, StorageResult};
use mediagate_core::Config;
use std::sync::Arc;

/// Create the object store backend from configuration
#[cfg(feature = "storage-s3")]
pub fn create_object_store(
    config: &Config,
    sdk_config: &aws_config::SdkConfig,
) -> StorageResult<Arc<dyn ObjectStore>> {
    if let Some(endpoint) = config.s3_endpoint.as_deref() {
        tracing::info!(endpoint = %endpoint, "Using S3-compatible endpoint");
    }
    let store = S3ObjectStore::from_sdk_config(sdk_config, config.s3_endpoint.as_deref());
    Ok(Arc::new(store))
}

#[cfg(not(feature = "storage-s3"))]
pub fn create_object_store(_config: &Config) -> StorageResult<Arc<dyn ObjectStore>> {
    Err(crate::StorageError::ConfigError(
        "S3 object store not available (storage-s3 feature not enabled)".to_string(),
    ))
}
