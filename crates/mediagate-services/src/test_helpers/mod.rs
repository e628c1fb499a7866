//! In-memory fakes for the object store, alert channel, classifier and virus
//! scanner, plus a [`Harness`] wiring them into a [`ScanCoordinator`].

use crate::alert::AlertChannel;
use crate::clamav::{ScanResult, VirusScanner};
use crate::coordinator::ScanCoordinator;
use crate::oracle::{ClassificationOracle, ModerationPage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediagate_core::{
    CoordinationRecord, Evidence, LabelDetection, ModerationLabel, PendingObjectKey, ScanVerdict,
};
use mediagate_db::{CoordinationResult, CoordinationStore, MemoryCoordinationStore};
use mediagate_storage::{ObjectStore, ObjectTag, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const QUARANTINE_BUCKET: &str = "quarantine";

/// A mutating call made against [`RecordingObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Copy {
        from: (String, String),
        to: (String, String),
    },
    Tag {
        bucket: String,
        key: String,
    },
    Delete {
        bucket: String,
        key: String,
    },
}

#[derive(Default)]
struct ObjectState {
    objects: HashMap<(String, String), Vec<u8>>,
    tags: HashMap<(String, String), Vec<ObjectTag>>,
    metadata: HashMap<(String, String), HashMap<String, String>>,
    calls: Vec<StoreCall>,
    fail_copies: bool,
    fail_tagging: bool,
    fail_deletes: bool,
    fail_downloads: bool,
}

/// Object store that keeps objects in memory and records every mutation attempt.
#[derive(Default)]
pub struct RecordingObjectStore {
    state: Mutex<ObjectState>,
}

fn id(bucket: &str, key: &str) -> (String, String) {
    (bucket.to_string(), key.to_string())
}

impl RecordingObjectStore {
    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(id(bucket, key), data.to_vec());
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .objects
            .contains_key(&id(bucket, key))
    }

    pub fn mutations(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn deletes(&self) -> Vec<StoreCall> {
        self.mutations()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::Delete { .. }))
            .collect()
    }

    pub fn copies(&self) -> Vec<StoreCall> {
        self.mutations()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::Copy { .. }))
            .collect()
    }

    pub fn tag_value(&self, bucket: &str, key: &str, tag: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .tags
            .get(&id(bucket, key))?
            .iter()
            .find(|t| t.key == tag)
            .map(|t| t.value.clone())
    }

    /// User metadata written by the last metadata-replacing copy to this object.
    pub fn metadata(&self, bucket: &str, key: &str) -> Option<HashMap<String, String>> {
        self.state
            .lock()
            .unwrap()
            .metadata
            .get(&id(bucket, key))
            .cloned()
    }

    pub fn fail_copies(&self) {
        self.state.lock().unwrap().fail_copies = true;
    }

    pub fn fail_tagging(&self) {
        self.state.lock().unwrap().fail_tagging = true;
    }

    pub fn fail_deletes(&self) {
        self.state.lock().unwrap().fail_deletes = true;
    }

    pub fn fail_downloads(&self) {
        self.state.lock().unwrap().fail_downloads = true;
    }
}

impl RecordingObjectStore {
    fn copy(
        &self,
        source: (String, String),
        dest: (String, String),
        metadata: Option<&HashMap<String, String>>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Copy {
            from: source.clone(),
            to: dest.clone(),
        });
        if state.fail_copies {
            return Err(StorageError::CopyFailed("injected copy failure".to_string()));
        }
        let Some(data) = state.objects.get(&source).cloned() else {
            return Err(StorageError::NotFound(format!("{}/{}", source.0, source.1)));
        };
        let tags = state.tags.get(&source).cloned();
        state.objects.insert(dest.clone(), data);
        if let Some(tags) = tags {
            state.tags.insert(dest.clone(), tags);
        }
        if let Some(metadata) = metadata {
            state.metadata.insert(dest, metadata.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for RecordingObjectStore {
    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        self.copy(
            id(source_bucket, source_key),
            id(dest_bucket, dest_key),
            None,
        )
    }

    async fn copy_object_with_metadata(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<()> {
        self.copy(
            id(source_bucket, source_key),
            id(dest_bucket, dest_key),
            Some(metadata),
        )
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Delete {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if state.fail_deletes {
            return Err(StorageError::DeleteFailed("injected delete failure".to_string()));
        }
        state.objects.remove(&id(bucket, key));
        state.tags.remove(&id(bucket, key));
        Ok(())
    }

    async fn put_object_tags(
        &self,
        bucket: &str,
        key: &str,
        tags: &[ObjectTag],
    ) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Tag {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if state.fail_tagging {
            return Err(StorageError::TaggingFailed("injected tagging failure".to_string()));
        }
        if !state.objects.contains_key(&id(bucket, key)) {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }
        state.tags.insert(id(bucket, key), tags.to_vec());
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        Ok(self.contains(bucket, key))
    }

    async fn content_length(&self, bucket: &str, key: &str) -> StorageResult<u64> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&id(bucket, key))
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn download(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        if state.fail_downloads {
            return Err(StorageError::DownloadFailed("injected download failure".to_string()));
        }
        state
            .objects
            .get(&id(bucket, key))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }
}

#[derive(Debug, Clone)]
pub struct PublishedAlert {
    pub subject: String,
    pub body: String,
}

impl PublishedAlert {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }

    pub fn alert_type(&self) -> String {
        self.json()["type"].as_str().unwrap_or_default().to_string()
    }
}

/// Alert channel that records what was published, or fails every publish.
#[derive(Default)]
pub struct RecordingAlertChannel {
    published: Mutex<Vec<PublishedAlert>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingAlertChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedAlert> {
        self.published.lock().unwrap().clone()
    }

    pub fn of_type(&self, alert_type: &str) -> Vec<PublishedAlert> {
        self.published()
            .into_iter()
            .filter(|a| a.alert_type() == alert_type)
            .collect()
    }
}

#[async_trait]
impl AlertChannel for RecordingAlertChannel {
    async fn publish(&self, subject: &str, message: &str) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("alert topic unavailable");
        }
        self.published.lock().unwrap().push(PublishedAlert {
            subject: subject.to_string(),
            body: message.to_string(),
        });
        Ok(())
    }
}

/// Classifier returning scripted labels. Video pages are addressed by
/// `page-N` continuation tokens.
#[derive(Default)]
pub struct ScriptedOracle {
    pages: HashMap<String, Vec<Vec<ModerationLabel>>>,
    image_labels: HashMap<String, Vec<ModerationLabel>>,
    fail_pages: bool,
    fail_images: bool,
    fail_video_starts: bool,
    page_requests: Mutex<Vec<(String, Option<String>)>>,
    started: Mutex<Vec<(String, String)>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(mut self, job_id: &str, pages: Vec<Vec<ModerationLabel>>) -> Self {
        self.pages.insert(job_id.to_string(), pages);
        self
    }

    pub fn with_image_labels(mut self, key: &str, labels: Vec<ModerationLabel>) -> Self {
        self.image_labels.insert(key.to_string(), labels);
        self
    }

    pub fn failing_pages(mut self) -> Self {
        self.fail_pages = true;
        self
    }

    pub fn failing_images(mut self) -> Self {
        self.fail_images = true;
        self
    }

    pub fn failing_video_starts(mut self) -> Self {
        self.fail_video_starts = true;
        self
    }

    pub fn page_requests(&self) -> Vec<(String, Option<String>)> {
        self.page_requests.lock().unwrap().clone()
    }

    /// `(bucket, key)` of every started video job.
    pub fn started_jobs(&self) -> Vec<(String, String)> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClassificationOracle for ScriptedOracle {
    async fn get_moderation_page(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> anyhow::Result<ModerationPage> {
        self.page_requests
            .lock()
            .unwrap()
            .push((job_id.to_string(), next_token.map(str::to_string)));
        if self.fail_pages {
            anyhow::bail!("throttled");
        }
        let pages = self
            .pages
            .get(job_id)
            .ok_or_else(|| anyhow::anyhow!("unknown job {}", job_id))?;
        let index = match next_token {
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| anyhow::anyhow!("bad token {}", token))?,
            None => 0,
        };
        let labels = pages.get(index).cloned().unwrap_or_default();
        let detections = labels
            .into_iter()
            .enumerate()
            .map(|(i, label)| LabelDetection {
                timestamp_ms: (index * 1000 + i) as i64,
                label,
            })
            .collect();
        let next_token = (index + 1 < pages.len()).then(|| format!("page-{}", index + 1));
        Ok(ModerationPage {
            detections,
            next_token,
        })
    }

    async fn detect_image_labels(
        &self,
        _bucket: &str,
        key: &str,
    ) -> anyhow::Result<Vec<ModerationLabel>> {
        if self.fail_images {
            anyhow::bail!("image classification unavailable");
        }
        Ok(self.image_labels.get(key).cloned().unwrap_or_default())
    }

    async fn start_video_moderation(&self, bucket: &str, key: &str) -> anyhow::Result<String> {
        if self.fail_video_starts {
            anyhow::bail!("video classification unavailable");
        }
        let mut started = self.started.lock().unwrap();
        started.push((bucket.to_string(), key.to_string()));
        Ok(format!("job-{}", started.len()))
    }
}

/// Virus scanner returning a fixed result.
pub struct FixedScanner {
    result: ScanResult,
    scanned: AtomicUsize,
}

impl FixedScanner {
    pub fn new(result: ScanResult) -> Self {
        Self {
            result,
            scanned: AtomicUsize::new(0),
        }
    }

    pub fn scans(&self) -> usize {
        self.scanned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VirusScanner for FixedScanner {
    async fn scan(&self, _data: Vec<u8>) -> ScanResult {
        self.scanned.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Coordination store wrapper counting deletes.
pub struct CountingStore {
    inner: Arc<MemoryCoordinationStore>,
    deletes: AtomicUsize,
}

#[async_trait]
impl CoordinationStore for CountingStore {
    async fn record_verdict(
        &self,
        key: &PendingObjectKey,
        verdict: ScanVerdict,
        evidence: &Evidence,
        expected_scan_count: u32,
    ) -> CoordinationResult<CoordinationRecord> {
        self.inner
            .record_verdict(key, verdict, evidence, expected_scan_count)
            .await
    }

    async fn get(&self, key: &PendingObjectKey) -> CoordinationResult<Option<CoordinationRecord>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &PendingObjectKey) -> CoordinationResult<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    async fn list_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> CoordinationResult<Vec<CoordinationRecord>> {
        self.inner.list_stale(older_than, limit).await
    }

    async fn touch(&self, key: &PendingObjectKey) -> CoordinationResult<bool> {
        self.inner.touch(key).await
    }
}

pub struct Harness {
    pub store: Arc<MemoryCoordinationStore>,
    pub counting: Arc<CountingStore>,
    pub objects: Arc<RecordingObjectStore>,
    pub alerts: Arc<RecordingAlertChannel>,
    pub quarantine_bucket: Option<String>,
    pub expected_scan_count: u32,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(RecordingAlertChannel::new(), Some(QUARANTINE_BUCKET.to_string()), 2)
    }

    pub fn with_failing_alerts() -> Self {
        Self::build(
            RecordingAlertChannel::failing(),
            Some(QUARANTINE_BUCKET.to_string()),
            2,
        )
    }

    pub fn without_quarantine_bucket() -> Self {
        Self::build(RecordingAlertChannel::new(), None, 2)
    }

    pub fn with_expected_scans(expected_scan_count: u32) -> Self {
        Self::build(
            RecordingAlertChannel::new(),
            Some(QUARANTINE_BUCKET.to_string()),
            expected_scan_count,
        )
    }

    fn build(
        alerts: RecordingAlertChannel,
        quarantine_bucket: Option<String>,
        expected_scan_count: u32,
    ) -> Self {
        let store = Arc::new(MemoryCoordinationStore::new());
        let counting = Arc::new(CountingStore {
            inner: store.clone(),
            deletes: AtomicUsize::new(0),
        });
        Self {
            store,
            counting,
            objects: Arc::new(RecordingObjectStore::default()),
            alerts: Arc::new(alerts),
            quarantine_bucket,
            expected_scan_count,
        }
    }

    pub fn coordinator(&self) -> ScanCoordinator {
        ScanCoordinator::new(
            self.counting.clone(),
            self.objects.clone(),
            self.alerts.clone(),
            self.quarantine_bucket.clone(),
            self.expected_scan_count,
        )
    }

    pub fn shared_coordinator(&self) -> Arc<ScanCoordinator> {
        Arc::new(self.coordinator())
    }

    /// Record a verdict directly, bypassing the coordinator.
    pub async fn record(&self, key: PendingObjectKey, verdict: ScanVerdict) -> CoordinationRecord {
        self.record_with(key, verdict, Evidence::default()).await
    }

    pub async fn record_with(
        &self,
        key: PendingObjectKey,
        verdict: ScanVerdict,
        evidence: Evidence,
    ) -> CoordinationRecord {
        self.store
            .record_verdict(&key, verdict, &evidence, self.expected_scan_count)
            .await
            .unwrap()
    }

    pub fn record_deletes(&self) -> usize {
        self.counting.deletes.load(Ordering::SeqCst)
    }
}
