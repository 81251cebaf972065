//! Dataset subset targets
//!
//! A subset expression restricts which records of a dataset are visible.
//! The host owns the subset; the engine only reads and replaces it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::error::DataError;
use crate::utils::file::write_atomic;

#[async_trait]
pub trait SubsetTarget: Send + Sync {
    /// Currently applied subset expression (empty when unfiltered)
    async fn current_subset(&self) -> Result<String, DataError>;

    /// Replace the subset expression; an empty string clears it
    async fn set_subset(&self, expression: &str) -> Result<(), DataError>;
}

/// Subset held in memory; keeps every applied expression for inspection
#[derive(Debug, Default)]
pub struct MemorySubset {
    current: RwLock<String>,
    applied: Mutex<Vec<String>>,
}

impl MemorySubset {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(initial.into()),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Every expression passed to `set_subset`, oldest first
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl SubsetTarget for MemorySubset {
    async fn current_subset(&self) -> Result<String, DataError> {
        Ok(self.current.read().clone())
    }

    async fn set_subset(&self, expression: &str) -> Result<(), DataError> {
        *self.current.write() = expression.to_string();
        self.applied.lock().push(expression.to_string());
        Ok(())
    }
}

/// JSON file mapping dataset ids to their applied subset expressions
pub struct SubsetStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl SubsetStore {
    pub fn new(path: impl AsRef<Path>) -> Arc<Self> {
        Arc::new(Self {
            path: path.as_ref().to_path_buf(),
            lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, DataError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, dataset_id: &str) -> Result<String, DataError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(dataset_id).unwrap_or_default())
    }

    pub async fn set(&self, dataset_id: &str, expression: &str) -> Result<(), DataError> {
        let _guard = self.lock.lock().await;
        let mut subsets = self.load().await?;
        if expression.is_empty() {
            subsets.remove(dataset_id);
        } else {
            subsets.insert(dataset_id.to_string(), expression.to_string());
        }
        let bytes = serde_json::to_vec_pretty(&subsets)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| DataError::task("subsets", e.to_string()))??;
        Ok(())
    }

    /// Subset target bound to one dataset
    pub fn target(self: &Arc<Self>, dataset_id: impl Into<String>) -> StoredSubset {
        StoredSubset {
            store: Arc::clone(self),
            dataset_id: dataset_id.into(),
        }
    }
}

/// One dataset's entry in a [`SubsetStore`]
pub struct StoredSubset {
    store: Arc<SubsetStore>,
    dataset_id: String,
}

#[async_trait]
impl SubsetTarget for StoredSubset {
    async fn current_subset(&self) -> Result<String, DataError> {
        self.store.get(&self.dataset_id).await
    }

    async fn set_subset(&self, expression: &str) -> Result<(), DataError> {
        self.store.set(&self.dataset_id, expression).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_subset_records_history() {
        let subset = MemorySubset::new("\"a\" = 1");
        subset.set_subset("\"b\" = 2").await.unwrap();
        subset.set_subset("").await.unwrap();
        assert_eq!(subset.current_subset().await.unwrap(), "");
        assert_eq!(subset.applied(), vec!["\"b\" = 2", ""]);
    }

    #[tokio::test]
    async fn test_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubsetStore::new(dir.path().join("subsets.json"));
        let roads = store.target("roads");
        let rivers = store.target("rivers");

        roads.set_subset("\"id\" IN (1)").await.unwrap();
        rivers.set_subset("\"id\" IN (2)").await.unwrap();
        assert_eq!(roads.current_subset().await.unwrap(), "\"id\" IN (1)");

        roads.set_subset("").await.unwrap();
        assert_eq!(roads.current_subset().await.unwrap(), "");
        assert_eq!(rivers.current_subset().await.unwrap(), "\"id\" IN (2)");
    }

    #[tokio::test]
    async fn test_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubsetStore::new(dir.path().join("none.json"));
        assert_eq!(store.get("roads").await.unwrap(), "");
    }
}
