use crate::traits::{CoordinationError, CoordinationResult, CoordinationStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediagate_core::{CoordinationRecord, Evidence, PendingObjectKey, ScanVerdict};
use sqlx::PgPool;

/// PostgreSQL-backed coordination store.
#[derive(Clone)]
pub struct PgCoordinationStore {
    pool: PgPool,
}

impl PgCoordinationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CoordinationRow {
    bucket: String,
    staging_key: String,
    expected_scan_count: i32,
    virus_scan_result: Option<String>,
    moderation_result: Option<String>,
    completed_by: Option<String>,
    virus_scan_details: Option<String>,
    /// JSON array, selected as text.
    moderation_labels: String,
    virus_reports: i32,
    moderation_reports: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CoordinationRow> for CoordinationRecord {
    type Error = CoordinationError;

    fn try_from(row: CoordinationRow) -> Result<Self, Self::Error> {
        let invalid = |e: anyhow::Error| CoordinationError::InvalidRecord(e.to_string());
        let count = |column: &str, value: i32| {
            u32::try_from(value).map_err(|_| {
                CoordinationError::InvalidRecord(format!("negative {} {}", column, value))
            })
        };
        Ok(CoordinationRecord {
            key: PendingObjectKey::new(row.bucket, row.staging_key),
            expected_scan_count: count("expected_scan_count", row.expected_scan_count)?,
            virus_scan_result: row
                .virus_scan_result
                .map(|v| v.parse())
                .transpose()
                .map_err(invalid)?,
            moderation_result: row
                .moderation_result
                .map(|v| v.parse())
                .transpose()
                .map_err(invalid)?,
            completed_by: row
                .completed_by
                .map(|v| v.parse())
                .transpose()
                .map_err(invalid)?,
            virus_scan_details: row.virus_scan_details,
            moderation_labels: serde_json::from_str(&row.moderation_labels).map_err(|e| {
                CoordinationError::InvalidRecord(format!("moderation_labels: {}", e))
            })?,
            virus_reports: count("virus_reports", row.virus_reports)?,
            moderation_reports: count("moderation_reports", row.moderation_reports)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const RECORD_COLUMNS: &str = "bucket, staging_key, expected_scan_count, virus_scan_result, \
     moderation_result, completed_by, virus_scan_details, \
     moderation_labels::text AS moderation_labels, virus_reports, moderation_reports, \
     created_at, updated_at";

#[async_trait]
impl CoordinationStore for PgCoordinationStore {
    #[tracing::instrument(skip(self, evidence), fields(
        db.system = "postgresql",
        db.table = "scan_coordination",
        db.operation = "upsert",
        scanner = %verdict.scanner()
    ))]
    async fn record_verdict(
        &self,
        key: &PendingObjectKey,
        verdict: ScanVerdict,
        evidence: &Evidence,
        expected_scan_count: u32,
    ) -> CoordinationResult<CoordinationRecord> {
        let (virus, moderation) = match verdict {
            ScanVerdict::Virus(v) => (Some(v.as_str()), None),
            ScanVerdict::Moderation(m) => (None, Some(m.as_str())),
        };
        let (details, labels) = match verdict {
            ScanVerdict::Virus(_) => (evidence.details.as_deref(), "[]".to_string()),
            ScanVerdict::Moderation(_) => (
                None,
                serde_json::to_string(&evidence.labels).map_err(|e| {
                    CoordinationError::InvalidRecord(format!("moderation_labels: {}", e))
                })?,
            ),
        };
        let expected = i32::try_from(expected_scan_count).unwrap_or(i32::MAX);

        // Each scanner kind fills its own verdict and evidence columns once; the count
        // is derived from the verdict columns present, and completed_by is written by
        // the merge that first reaches the expected count. SET expressions read the
        // row as it was before this statement.
        let query = format!(
            r#"
            INSERT INTO scan_coordination AS sc (
                bucket, staging_key, expected_scan_count,
                virus_scan_result, moderation_result, completed_by,
                virus_scan_details, moderation_labels,
                virus_reports, moderation_reports,
                created_at, updated_at
            )
            VALUES (
                $1, $2, $3::int, $4::text, $5::text,
                CASE WHEN $3::int <= 1 THEN $6::text END,
                $7::text, $8::jsonb,
                ($4::text IS NOT NULL)::int, ($5::text IS NOT NULL)::int,
                NOW(), NOW()
            )
            ON CONFLICT (bucket, staging_key) DO UPDATE SET
                virus_scan_result = COALESCE(sc.virus_scan_result, EXCLUDED.virus_scan_result),
                moderation_result = COALESCE(sc.moderation_result, EXCLUDED.moderation_result),
                virus_scan_details = CASE WHEN sc.virus_scan_result IS NULL
                    THEN EXCLUDED.virus_scan_details ELSE sc.virus_scan_details END,
                moderation_labels = CASE WHEN sc.moderation_result IS NULL
                    AND EXCLUDED.moderation_result IS NOT NULL
                    THEN EXCLUDED.moderation_labels ELSE sc.moderation_labels END,
                virus_reports = sc.virus_reports + EXCLUDED.virus_reports,
                moderation_reports = sc.moderation_reports + EXCLUDED.moderation_reports,
                completed_by = COALESCE(
                    sc.completed_by,
                    CASE WHEN
                        (COALESCE(sc.virus_scan_result, EXCLUDED.virus_scan_result) IS NOT NULL)::int
                        + (COALESCE(sc.moderation_result, EXCLUDED.moderation_result) IS NOT NULL)::int
                        >= sc.expected_scan_count
                    THEN $6::text END
                ),
                updated_at = NOW()
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, CoordinationRow>(&query)
            .bind(&key.bucket)
            .bind(&key.staging_key)
            .bind(expected)
            .bind(virus)
            .bind(moderation)
            .bind(verdict.scanner().as_str())
            .bind(details)
            .bind(labels)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %key.bucket,
                    key = %key.staging_key,
                    "Failed to record scan verdict"
                );
                e
            })?;

        row.try_into()
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "scan_coordination",
        db.operation = "select"
    ))]
    async fn get(&self, key: &PendingObjectKey) -> CoordinationResult<Option<CoordinationRecord>> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM scan_coordination WHERE bucket = $1 AND staging_key = $2"
        );
        let row = sqlx::query_as::<_, CoordinationRow>(&query)
            .bind(&key.bucket)
            .bind(&key.staging_key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CoordinationRecord::try_from).transpose()
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "scan_coordination",
        db.operation = "delete"
    ))]
    async fn delete(&self, key: &PendingObjectKey) -> CoordinationResult<bool> {
        let result =
            sqlx::query("DELETE FROM scan_coordination WHERE bucket = $1 AND staging_key = $2")
                .bind(&key.bucket)
                .bind(&key.staging_key)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "scan_coordination",
        db.operation = "select"
    ))]
    async fn list_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> CoordinationResult<Vec<CoordinationRecord>> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM scan_coordination \
             WHERE created_at < $1 ORDER BY updated_at ASC, created_at ASC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, CoordinationRow>(&query)
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(CoordinationRecord::try_from).collect()
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "scan_coordination",
        db.operation = "update"
    ))]
    async fn touch(&self, key: &PendingObjectKey) -> CoordinationResult<bool> {
        let result = sqlx::query(
            "UPDATE scan_coordination SET updated_at = NOW() \
             WHERE bucket = $1 AND staging_key = $2",
        )
        .bind(&key.bucket)
        .bind(&key.staging_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
