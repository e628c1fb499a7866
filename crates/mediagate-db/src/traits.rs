//! Coordination store trait and errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediagate_core::{CoordinationRecord, Evidence, PendingObjectKey, ScanVerdict};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid coordination record: {0}")]
    InvalidRecord(String),
}

pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Persistent per-object scan coordination.
///
/// `record_verdict` must be a single atomic create-if-absent merge: concurrent
/// reports for the same object never lose a verdict, and exactly one of them
/// observes the record becoming complete.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Merge one scanner's verdict and return the resulting record.
    ///
    /// `evidence` is stored only when this report's verdict is the one kept.
    async fn record_verdict(
        &self,
        key: &PendingObjectKey,
        verdict: ScanVerdict,
        evidence: &Evidence,
        expected_scan_count: u32,
    ) -> CoordinationResult<CoordinationRecord>;

    async fn get(&self, key: &PendingObjectKey) -> CoordinationResult<Option<CoordinationRecord>>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, key: &PendingObjectKey) -> CoordinationResult<bool>;

    /// Records created before `older_than`, least recently updated first.
    async fn list_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> CoordinationResult<Vec<CoordinationRecord>>;

    /// Refresh `updated_at`, moving the record behind every other stale record.
    /// Returns `false` when the record no longer exists.
    async fn touch(&self, key: &PendingObjectKey) -> CoordinationResult<bool>;
}
