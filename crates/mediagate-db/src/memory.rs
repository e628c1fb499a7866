use crate::traits::{CoordinationResult, CoordinationStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediagate_core::{CoordinationRecord, Evidence, PendingObjectKey, ScanVerdict};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Process-local coordination store.
///
/// Same merge semantics as the PostgreSQL store, but state is lost on restart and
/// not shared between worker processes.
#[derive(Default)]
pub struct MemoryCoordinationStore {
    records: Mutex<HashMap<PendingObjectKey, CoordinationRecord>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Insert a record as-is, replacing any existing one.
    pub async fn insert(&self, record: CoordinationRecord) {
        self.records
            .lock()
            .await
            .insert(record.key.clone(), record);
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn record_verdict(
        &self,
        key: &PendingObjectKey,
        verdict: ScanVerdict,
        evidence: &Evidence,
        expected_scan_count: u32,
    ) -> CoordinationResult<CoordinationRecord> {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let record = records
            .entry(key.clone())
            .or_insert_with(|| CoordinationRecord::new(key.clone(), expected_scan_count, now));
        record.merge(verdict, evidence, now);
        Ok(record.clone())
    }

    async fn get(&self, key: &PendingObjectKey) -> CoordinationResult<Option<CoordinationRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &PendingObjectKey) -> CoordinationResult<bool> {
        Ok(self.records.lock().await.remove(key).is_some())
    }

    async fn list_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> CoordinationResult<Vec<CoordinationRecord>> {
        let records = self.records.lock().await;
        let mut stale: Vec<CoordinationRecord> = records
            .values()
            .filter(|r| r.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|r| (r.updated_at, r.created_at));
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }

    async fn touch(&self, key: &PendingObjectKey) -> CoordinationResult<bool> {
        let mut records = self.records.lock().await;
        Ok(match records.get_mut(key) {
            Some(record) => {
                record.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }
}
