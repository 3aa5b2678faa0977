use async_trait::async_trait;
use db::{SnapshotRecord, SnapshotRepository};
use orchestrator::{OrchestratorError, Result, SessionSnapshot, SessionStore};
use uuid::Uuid;

/// [`SessionStore`] backed by the project's SQLite database.
#[derive(Clone)]
pub struct SqliteSessionStore {
    repo: SnapshotRepository,
}

impl SqliteSessionStore {
    pub fn new(repo: SnapshotRepository) -> Self {
        Self { repo }
    }
}

fn persistence(e: db::DbError) -> OrchestratorError {
    OrchestratorError::Persistence(e.to_string())
}

fn into_snapshot(record: SnapshotRecord) -> SessionSnapshot {
    SessionSnapshot {
        session_id: record.session_id,
        revision: record.revision,
        captured_at: record.updated_at,
        state: record.state,
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save(&self, session_id: Uuid, snapshot: &SessionSnapshot) -> Result<()> {
        let record = SnapshotRecord {
            session_id,
            revision: snapshot.revision,
            state: snapshot.state.clone(),
            updated_at: snapshot.captured_at,
        };
        self.repo.save(&record).await.map_err(persistence)
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<SessionSnapshot>> {
        let record = self
            .repo
            .find_by_id(session_id)
            .await
            .map_err(persistence)?;
        Ok(record.map(into_snapshot))
    }

    async fn list(&self) -> Result<Vec<SessionSnapshot>> {
        let records = self.repo.find_all().await.map_err(persistence)?;
        Ok(records.into_iter().map(into_snapshot).collect())
    }
}
