use crate::error::DbError;
use crate::models::{SnapshotRecord, SnapshotRow};
use flow_core::OrchestrationStatus;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct SnapshotRepository {
    pool: SqlitePool,
}

impl SnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace the snapshot of `record.session_id`.
    pub async fn save(&self, record: &SnapshotRecord) -> Result<(), DbError> {
        let row = SnapshotRow::from_record(record)?;

        sqlx::query(
            r#"
            INSERT INTO orchestration_sessions (session_id, revision, status, flow_code, state_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                revision = excluded.revision,
                status = excluded.status,
                flow_code = excluded.flow_code,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.session_id)
        .bind(row.revision)
        .bind(&row.status)
        .bind(&row.flow_code)
        .bind(&row.state_json)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(
            session_id = %record.session_id,
            revision = record.revision,
            status = %row.status,
            "Saved orchestration snapshot"
        );
        Ok(())
    }

    pub async fn find_by_id(&self, session_id: Uuid) -> Result<Option<SnapshotRecord>, DbError> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT session_id, revision, status, flow_code, state_json, created_at, updated_at
            FROM orchestration_sessions
            WHERE session_id = ?
            "#,
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SnapshotRow::into_domain).transpose()
    }

    pub async fn find_all(&self) -> Result<Vec<SnapshotRecord>, DbError> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT session_id, revision, status, flow_code, state_json, created_at, updated_at
            FROM orchestration_sessions
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SnapshotRow::into_domain).collect()
    }

    /// Sessions that can still be resumed.
    pub async fn find_resumable(&self) -> Result<Vec<SnapshotRecord>, DbError> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT session_id, revision, status, flow_code, state_json, created_at, updated_at
            FROM orchestration_sessions
            WHERE status IN (?, ?)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(OrchestrationStatus::Running.as_str())
        .bind(OrchestrationStatus::AwaitingConsultation.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SnapshotRow::into_domain).collect()
    }
}
