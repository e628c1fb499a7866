//! Coordination store behaviour under concurrent and repeated reports.

use mediagate_core::{
    Evidence, ModerationLabel, ModerationStatus, PendingObjectKey, ScanVerdict, ScannerKind,
    VirusVerdict,
};
use mediagate_db::{CoordinationStore, MemoryCoordinationStore, PgCoordinationStore};
use std::sync::Arc;

fn none() -> Evidence {
    Evidence::default()
}

async fn exercise_concurrent_reports(store: Arc<dyn CoordinationStore>, key: PendingObjectKey) {
    let virus = {
        let store = store.clone();
        let key = key.clone();
        tokio::spawn(async move {
            store
                .record_verdict(&key, ScanVerdict::Virus(VirusVerdict::Passed), &none(), 2)
                .await
        })
    };
    let moderation = {
        let store = store.clone();
        let key = key.clone();
        tokio::spawn(async move {
            store
                .record_verdict(
                    &key,
                    ScanVerdict::Moderation(ModerationStatus::UnderReview),
                    &none(),
                    2,
                )
                .await
        })
    };

    let virus = virus.await.unwrap().unwrap();
    let moderation = moderation.await.unwrap().unwrap();

    // Exactly one of the two reports observes completion, and both agree who completed it.
    let completions = [&virus, &moderation]
        .iter()
        .filter(|r| r.is_complete())
        .count();
    assert_eq!(completions, 1);
    let final_record = store.get(&key).await.unwrap().unwrap();
    assert_eq!(final_record.scan_count(), 2);
    let completed_by = final_record.completed_by.unwrap();
    let completing = match completed_by {
        ScannerKind::Virus => &virus,
        ScannerKind::Moderation => &moderation,
    };
    assert!(completing.is_complete());
    assert_eq!(final_record.virus_scan_result, Some(VirusVerdict::Passed));
    assert_eq!(
        final_record.moderation_result,
        Some(ModerationStatus::UnderReview)
    );
}

async fn exercise_duplicate_reports(store: Arc<dyn CoordinationStore>, key: PendingObjectKey) {
    for _ in 0..3 {
        let record = store
            .record_verdict(&key, ScanVerdict::Virus(VirusVerdict::Passed), &none(), 2)
            .await
            .unwrap();
        assert_eq!(record.scan_count(), 1);
        assert!(record.completed_by.is_none());
    }

    let record = store
        .record_verdict(
            &key,
            ScanVerdict::Moderation(ModerationStatus::Passed),
            &none(),
            2,
        )
        .await
        .unwrap();
    assert_eq!(record.completed_by, Some(ScannerKind::Moderation));

    // A late duplicate from the other scanner does not change who completed the record.
    let record = store
        .record_verdict(&key, ScanVerdict::Virus(VirusVerdict::Quarantine), &none(), 2)
        .await
        .unwrap();
    assert_eq!(record.completed_by, Some(ScannerKind::Moderation));
    assert_eq!(record.virus_scan_result, Some(VirusVerdict::Passed));

    assert!(store.delete(&key).await.unwrap());
    assert!(!store.delete(&key).await.unwrap());
}

async fn exercise_evidence_kept(store: Arc<dyn CoordinationStore>, key: PendingObjectKey) {
    let labels = vec![
        ModerationLabel::new("Explicit Nudity", 97.0).with_parent("Nudity"),
        ModerationLabel::new("Suggestive", 64.5),
    ];
    let first = store
        .record_verdict(
            &key,
            ScanVerdict::Moderation(ModerationStatus::Quarantine),
            &Evidence::labels(labels.clone()),
            2,
        )
        .await
        .unwrap();
    assert_eq!(first.reports_from(ScannerKind::Moderation), 1);

    // A redelivered moderation report neither replaces the labels nor the verdict.
    let duplicate = store
        .record_verdict(
            &key,
            ScanVerdict::Moderation(ModerationStatus::Passed),
            &Evidence::labels(Vec::new()),
            2,
        )
        .await
        .unwrap();
    assert_eq!(duplicate.reports_from(ScannerKind::Moderation), 2);

    let completed = store
        .record_verdict(
            &key,
            ScanVerdict::Virus(VirusVerdict::Passed),
            &Evidence::details("Skipped: media type"),
            2,
        )
        .await
        .unwrap();

    assert_eq!(completed.completed_by, Some(ScannerKind::Virus));
    assert_eq!(completed.moderation_result, Some(ModerationStatus::Quarantine));
    assert_eq!(completed.moderation_labels, labels);
    assert_eq!(
        completed.virus_scan_details.as_deref(),
        Some("Skipped: media type")
    );
    assert_eq!(completed.reports_from(ScannerKind::Virus), 1);
    assert_eq!(store.get(&key).await.unwrap(), Some(completed));
}

#[tokio::test]
async fn memory_store_concurrent_reports() {
    for i in 0..20 {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let key = PendingObjectKey::new("uploads", format!("pending-scan/concurrent-{i}.jpg"));
        exercise_concurrent_reports(store, key).await;
    }
}

#[tokio::test]
async fn memory_store_duplicate_reports() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
    exercise_duplicate_reports(store, PendingObjectKey::new("uploads", "pending-scan/dup.png"))
        .await;
}

#[tokio::test]
async fn memory_store_single_expected_scan() {
    let store = MemoryCoordinationStore::new();
    let key = PendingObjectKey::new("uploads", "pending-scan/one.pdf");

    let record = store
        .record_verdict(&key, ScanVerdict::Virus(VirusVerdict::Passed), &none(), 1)
        .await
        .unwrap();

    assert!(record.is_complete());
    assert_eq!(record.completed_by, Some(ScannerKind::Virus));
}

#[tokio::test]
async fn memory_store_keeps_first_evidence() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
    exercise_evidence_kept(store, PendingObjectKey::new("uploads", "pending-scan/labels.jpg"))
        .await;
}

async fn pg_store() -> Arc<dyn CoordinationStore> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("Failed to connect to test database");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    Arc::new(PgCoordinationStore::new(pool))
}

fn unique_key(name: &str) -> PendingObjectKey {
    let suffix = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    PendingObjectKey::new("it-bucket", format!("pending-scan/{name}-{suffix}"))
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a PostgreSQL instance"]
async fn postgres_store_concurrent_reports() {
    let store = pg_store().await;
    for i in 0..10 {
        let key = unique_key(&format!("concurrent-{i}"));
        exercise_concurrent_reports(store.clone(), key.clone()).await;
        store.delete(&key).await.unwrap();
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a PostgreSQL instance"]
async fn postgres_store_duplicate_reports() {
    let store = pg_store().await;
    exercise_duplicate_reports(store, unique_key("dup")).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a PostgreSQL instance"]
async fn postgres_store_keeps_first_evidence() {
    let store = pg_store().await;
    let key = unique_key("labels");
    exercise_evidence_kept(store.clone(), key.clone()).await;
    store.delete(&key).await.unwrap();
}
