//! Session persistence
//!
//! The current filter state of every dataset is written to a JSON file in the
//! data directory so history roots survive a restart. Full undo stacks are
//! stored alongside when available so a later process can still step back,
//! as are the backend objects a later reset has to drop.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::DataError;
use crate::domain::backend::MaterializationRef;
use crate::domain::dataset::ProviderKind;
use crate::utils::file::write_atomic;

const SESSION_VERSION: u32 = 1;

/// Persisted current state of one dataset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionRecord {
    pub dataset_id: String,
    pub expression: String,
    pub sequence: u64,
    pub provider_kind: ProviderKind,
}

/// Undo stack of one dataset, oldest state first
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionStack {
    pub dataset_id: String,
    /// Index of the applied state in `states`
    pub cursor: usize,
    pub states: Vec<SessionRecord>,
}

/// Materialized view or scratch table created for a dataset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionArtifact {
    pub dataset_id: String,
    /// Tier that created the object
    pub provider_kind: ProviderKind,
    pub reference: MaterializationRef,
}

/// Everything persisted for a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current state per dataset
    pub records: Vec<SessionRecord>,
    pub stacks: Vec<SessionStack>,
    pub artifacts: Vec<SessionArtifact>,
}

impl SessionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.stacks.is_empty() && self.artifacts.is_empty()
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct SessionFile {
    version: u32,
    #[serde(default)]
    records: Vec<SessionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    stacks: Vec<SessionStack>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    artifacts: Vec<SessionArtifact>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the session; a missing file is an empty session
    pub async fn load(&self) -> Result<SessionSnapshot, DataError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SessionSnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };
        let file: SessionFile = serde_json::from_slice(&bytes)?;
        if file.version != SESSION_VERSION {
            tracing::warn!(
                path = %self.path.display(),
                version = file.version,
                "Ignoring session file with unknown version"
            );
            return Ok(SessionSnapshot::default());
        }
        Ok(SessionSnapshot {
            records: file.records,
            stacks: file.stacks,
            artifacts: file.artifacts,
        })
    }

    pub async fn save(&self, snapshot: SessionSnapshot) -> Result<(), DataError> {
        let file = SessionFile {
            version: SESSION_VERSION,
            records: snapshot.records,
            stacks: snapshot.stacks,
            artifacts: snapshot.artifacts,
        };
        let json = serde_json::to_vec_pretty(&file)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .map_err(|e| DataError::task("session", e.to_string()))??;
        tracing::debug!(path = %self.path.display(), "Session saved");
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), DataError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, seq: u64) -> SessionRecord {
        SessionRecord {
            dataset_id: id.to_string(),
            expression: format!("\"id\" IN ({})", seq),
            sequence: seq,
            provider_kind: ProviderKind::EmbeddedSql,
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        assert!(store.load().await.unwrap().is_empty());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested/session.json"));
        let snapshot = SessionSnapshot {
            records: vec![record("roads", 3), record("rivers", 7)],
            stacks: vec![SessionStack {
                dataset_id: "roads".into(),
                cursor: 1,
                states: vec![record("roads", 1), record("roads", 3)],
            }],
            artifacts: vec![SessionArtifact {
                dataset_id: "roads".into(),
                provider_kind: ProviderKind::FullSql,
                reference: MaterializationRef::MaterializedView {
                    schema: "geofilter".into(),
                    name: "mv_0123".into(),
                    subset: "\"id\" IN (SELECT \"id\" FROM \"geofilter\".\"mv_0123\")".into(),
                },
            }],
        };
        store.save(snapshot.clone()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), snapshot);

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_records_without_stacks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(
            &path,
            r#"{"version": 1, "records": [{"dataset_id": "roads", "expression": "", "sequence": 4, "provider_kind": "full_sql"}]}"#,
        )
        .unwrap();
        let snapshot = SessionStore::new(path).load().await.unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert!(snapshot.stacks.is_empty());
        assert!(snapshot.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_version_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"version": 99, "records": []}"#).unwrap();
        assert!(SessionStore::new(path).load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = SessionStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, DataError::Serialization(_)));
    }
}
