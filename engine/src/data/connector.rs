//! Dataset connection capability
//!
//! The engine never manages server connections or authentication itself.
//! A [`DatasetConnector`] hands it a fresh [`DatasetHandle`] per run, carrying
//! whatever capabilities the dataset offers.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::error::DataError;
use super::executor::SqlExecutor;
use super::reader::FeatureReader;
use super::subset::SubsetTarget;
use crate::domain::dataset::DatasetDescriptor;

/// Per-run view of one dataset's capabilities
#[derive(Clone)]
pub struct DatasetHandle {
    pub descriptor: DatasetDescriptor,
    /// SQL executor for full or embedded SQL datasets
    pub sql: Option<Arc<dyn SqlExecutor>>,
    /// Feature reader, required for the in-memory path
    pub reader: Option<Arc<dyn FeatureReader>>,
    pub subset: Arc<dyn SubsetTarget>,
    /// Approximate feature count, used for performance warnings only
    pub feature_count_estimate: Option<u64>,
}

impl std::fmt::Debug for DatasetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetHandle")
            .field("dataset_id", &self.descriptor.dataset_id)
            .field("sql", &self.sql.as_ref().map(|s| s.backend()))
            .field("reader", &self.reader.is_some())
            .field("feature_count_estimate", &self.feature_count_estimate)
            .finish()
    }
}

#[async_trait]
pub trait DatasetConnector: Send + Sync {
    async fn connect(&self, descriptor: &DatasetDescriptor) -> Result<DatasetHandle, DataError>;
}

/// Capabilities registered for one dataset id
#[derive(Clone)]
pub struct DatasetBinding {
    pub sql: Option<Arc<dyn SqlExecutor>>,
    pub reader: Option<Arc<dyn FeatureReader>>,
    pub subset: Arc<dyn SubsetTarget>,
    pub feature_count_estimate: Option<u64>,
}

impl DatasetBinding {
    pub fn new(subset: Arc<dyn SubsetTarget>) -> Self {
        Self {
            sql: None,
            reader: None,
            subset,
            feature_count_estimate: None,
        }
    }

    pub fn with_sql(mut self, sql: Arc<dyn SqlExecutor>) -> Self {
        self.sql = Some(sql);
        self
    }

    pub fn with_reader(mut self, reader: Arc<dyn FeatureReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn with_estimate(mut self, count: u64) -> Self {
        self.feature_count_estimate = Some(count);
        self
    }
}

/// Connector over a registry of pre-built bindings
#[derive(Default)]
pub struct RegistryConnector {
    bindings: DashMap<String, DatasetBinding>,
}

impl RegistryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dataset_id: impl Into<String>, binding: DatasetBinding) {
        self.bindings.insert(dataset_id.into(), binding);
    }

    pub fn is_registered(&self, dataset_id: &str) -> bool {
        self.bindings.contains_key(dataset_id)
    }
}

#[async_trait]
impl DatasetConnector for RegistryConnector {
    async fn connect(&self, descriptor: &DatasetDescriptor) -> Result<DatasetHandle, DataError> {
        let binding = self
            .bindings
            .get(&descriptor.dataset_id)
            .map(|b| b.value().clone())
            .ok_or_else(|| DataError::UnknownDataset(descriptor.dataset_id.clone()))?;

        let feature_count_estimate = match (binding.feature_count_estimate, &binding.reader) {
            (Some(count), _) => Some(count),
            (None, Some(reader)) => reader.feature_count().await.ok(),
            (None, None) => None,
        };

        Ok(DatasetHandle {
            descriptor: descriptor.clone(),
            sql: binding.sql,
            reader: binding.reader,
            subset: binding.subset,
            feature_count_estimate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::reader::{MemoryReader, SourceFeature};
    use crate::data::subset::MemorySubset;
    use crate::domain::dataset::ProviderKind;
    use crate::domain::dataset::fixtures::descriptor;
    use geo::point;

    #[tokio::test]
    async fn test_connect_unknown_dataset() {
        let connector = RegistryConnector::new();
        let err = connector
            .connect(&descriptor("roads", ProviderKind::FullSql))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::UnknownDataset(_)));
    }

    #[tokio::test]
    async fn test_connect_estimates_from_reader() {
        let connector = RegistryConnector::new();
        let reader = MemoryReader::new(vec![SourceFeature::new(1, point!(x: 0.0, y: 0.0))]);
        connector.register(
            "roads",
            DatasetBinding::new(Arc::new(MemorySubset::default())).with_reader(Arc::new(reader)),
        );
        let handle = connector
            .connect(&descriptor("roads", ProviderKind::GenericReader))
            .await
            .unwrap();
        assert_eq!(handle.feature_count_estimate, Some(1));
        assert!(handle.sql.is_none());
    }
}
