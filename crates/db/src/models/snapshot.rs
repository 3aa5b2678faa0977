use chrono::{DateTime, TimeZone, Utc};
use flow_core::OrchestrationState;
use uuid::Uuid;

use crate::error::DbError;

/// Latest persisted state of one orchestration session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub session_id: Uuid,
    pub revision: u64,
    pub state: OrchestrationState,
    pub updated_at: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn new(session_id: Uuid, revision: u64, state: OrchestrationState) -> Self {
        Self {
            session_id,
            revision,
            state,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub session_id: String,
    pub revision: i64,
    pub status: String,
    pub flow_code: String,
    pub state_json: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SnapshotRow {
    pub fn from_record(record: &SnapshotRecord) -> Result<Self, DbError> {
        let updated_at = datetime_to_timestamp(record.updated_at);
        Ok(Self {
            session_id: record.session_id.to_string(),
            revision: i64::try_from(record.revision).map_err(|_| DbError::CorruptRow {
                session_id: record.session_id.to_string(),
                reason: format!("revision {} does not fit in a column", record.revision),
            })?,
            status: record.state.status().as_str().to_string(),
            flow_code: record.state.flow_code().encode(),
            state_json: serde_json::to_string(&record.state)?,
            created_at: updated_at,
            updated_at,
        })
    }

    pub fn into_domain(self) -> Result<SnapshotRecord, DbError> {
        let corrupt = |reason: String| DbError::CorruptRow {
            session_id: self.session_id.clone(),
            reason,
        };

        let session_id = Uuid::parse_str(&self.session_id).map_err(|e| corrupt(e.to_string()))?;
        let revision = u64::try_from(self.revision).map_err(|e| corrupt(e.to_string()))?;
        let state: OrchestrationState = serde_json::from_str(&self.state_json)?;

        Ok(SnapshotRecord {
            session_id,
            revision,
            state,
            updated_at: timestamp_to_datetime(self.updated_at),
        })
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

fn datetime_to_timestamp(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}
