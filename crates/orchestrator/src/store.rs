//! Session stores bundled with the orchestrator.
//!
//! File layout of [`JsonFileSessionStore`]:
//! ```text
//! .phaseflow/
//! └── sessions/
//!     └── <session_id>.json
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::session_binding::{SessionSnapshot, SessionStore};

const PHASEFLOW_DIR: &str = ".phaseflow";
const SESSIONS_DIR: &str = "sessions";

/// Process-local store, used by tests and short-lived runs.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    snapshots: RwLock<HashMap<Uuid, SessionSnapshot>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, session_id: Uuid, snapshot: &SessionSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(session_id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<SessionSnapshot>> {
        Ok(self.snapshots.read().await.get(&session_id).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionSnapshot>> {
        let mut snapshots: Vec<SessionSnapshot> =
            self.snapshots.read().await.values().cloned().collect();
        snapshots.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        Ok(snapshots)
    }
}

/// One pretty-printed JSON file per session under the project directory.
#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    project_path: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(project_path: impl AsRef<Path>) -> Self {
        Self {
            project_path: project_path.as_ref().to_path_buf(),
        }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.project_path.join(PHASEFLOW_DIR).join(SESSIONS_DIR)
    }

    fn session_path(&self, session_id: Uuid) -> PathBuf {
        self.sessions_dir().join(format!("{session_id}.json"))
    }

    async fn ensure_dir(&self) -> Result<()> {
        let dir = self.sessions_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            debug!("Created sessions directory: {}", dir.display());
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn save(&self, session_id: Uuid, snapshot: &SessionSnapshot) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.session_path(session_id);
        let tmp = path.with_extension("json.tmp");

        // Replace via rename; readers never see a partial file
        fs::write(&tmp, snapshot.to_json()?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<SessionSnapshot>> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(SessionSnapshot::from_json(&content)?))
    }

    async fn list(&self) -> Result<Vec<SessionSnapshot>> {
        let dir = self.sessions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            match SessionSnapshot::from_json(&content) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot"),
            }
        }

        snapshots.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        Ok(snapshots)
    }
}
