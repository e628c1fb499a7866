//! Mediagate Storage Library
//!
//! Object store abstraction used by the promotion and quarantine executors.
//! Every operation names its bucket explicitly because quarantine moves objects
//! across buckets.

pub mod factory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_object_store;
#[cfg(feature = "storage-s3")]
pub use s3::S3ObjectStore;
pub use traits::{truncate_value, ObjectStore, ObjectTag, StorageError, StorageResult};
