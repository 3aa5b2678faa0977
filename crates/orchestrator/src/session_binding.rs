//! Snapshot and restore of orchestration state for crash recovery and
//! cross-session resumption.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flow_core::OrchestrationState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// One persisted record per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    /// Incremented on every engine mutation; used to detect stale snapshots.
    pub revision: u64,
    pub captured_at: DateTime<Utc>,
    pub state: OrchestrationState,
}

impl SessionSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Storage backend for snapshots.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session_id: Uuid, snapshot: &SessionSnapshot) -> Result<()>;

    async fn load(&self, session_id: Uuid) -> Result<Option<SessionSnapshot>>;

    /// All stored snapshots, most recently captured first.
    async fn list(&self) -> Result<Vec<SessionSnapshot>>;
}

#[derive(Clone)]
pub struct SessionBinding {
    store: Arc<dyn SessionStore>,
}

impl SessionBinding {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn snapshot(
        session_id: Uuid,
        revision: u64,
        state: &OrchestrationState,
    ) -> SessionSnapshot {
        SessionSnapshot {
            session_id,
            revision,
            captured_at: Utc::now(),
            state: state.clone(),
        }
    }

    /// Validate and extract the state held by `snapshot`.
    pub fn restore(snapshot: &SessionSnapshot) -> Result<OrchestrationState> {
        snapshot.state.validate()?;
        Ok(snapshot.state.clone())
    }

    /// Persist `snapshot` unless the store already holds a newer revision.
    pub async fn checkpoint(&self, snapshot: &SessionSnapshot) -> Result<()> {
        if let Some(stored) = self.store.load(snapshot.session_id).await? {
            if stored.revision > snapshot.revision {
                return Err(OrchestratorError::StaleSnapshot {
                    session_id: snapshot.session_id,
                    offered: snapshot.revision,
                    stored: stored.revision,
                });
            }
        }

        self.store.save(snapshot.session_id, snapshot).await?;
        debug!(
            session_id = %snapshot.session_id,
            revision = snapshot.revision,
            "Checkpointed orchestration state"
        );
        Ok(())
    }

    /// Load the snapshot of `session_id`, rejecting it if it is older than
    /// `min_revision` or structurally invalid.
    pub async fn load(&self, session_id: Uuid, min_revision: Option<u64>) -> Result<SessionSnapshot> {
        let snapshot = self
            .store
            .load(session_id)
            .await?
            .ok_or(OrchestratorError::SessionNotFound(session_id))?;

        if let Some(min) = min_revision {
            if snapshot.revision < min {
                return Err(OrchestratorError::StaleSnapshot {
                    session_id,
                    offered: snapshot.revision,
                    stored: min,
                });
            }
        }

        Self::restore(&snapshot)?;
        Ok(snapshot)
    }
}
