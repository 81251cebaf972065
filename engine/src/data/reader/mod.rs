//! Feature readers for datasets without SQL capability

mod json_file;
mod memory;

use async_trait::async_trait;
use geo::Geometry;
use serde_json::{Map, Value};

pub use json_file::JsonFileReader;
pub use memory::MemoryReader;

use super::error::DataError;
use crate::domain::dataset::FeatureKey;

/// One feature as read from a dataset, geometry in the dataset's CRS
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFeature {
    pub key: FeatureKey,
    pub geometry: Geometry<f64>,
    pub attributes: Map<String, Value>,
}

impl SourceFeature {
    pub fn new(key: impl Into<FeatureKey>, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            key: key.into(),
            geometry: geometry.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }
}

#[async_trait]
pub trait FeatureReader: Send + Sync {
    /// Read features, restricted to `keys` when given
    async fn read_features(
        &self,
        keys: Option<&[FeatureKey]>,
    ) -> Result<Vec<SourceFeature>, DataError>;

    /// Total number of features
    async fn feature_count(&self) -> Result<u64, DataError>;
}
