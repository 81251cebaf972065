use std::collections::HashSet;

use async_trait::async_trait;

use super::{FeatureReader, SourceFeature};
use crate::data::error::DataError;
use crate::domain::dataset::FeatureKey;

/// Reader over features held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    features: Vec<SourceFeature>,
}

impl MemoryReader {
    pub fn new(features: Vec<SourceFeature>) -> Self {
        Self { features }
    }
}

#[async_trait]
impl FeatureReader for MemoryReader {
    async fn read_features(
        &self,
        keys: Option<&[FeatureKey]>,
    ) -> Result<Vec<SourceFeature>, DataError> {
        Ok(match keys {
            Some(keys) => {
                let wanted: HashSet<&FeatureKey> = keys.iter().collect();
                self.features
                    .iter()
                    .filter(|f| wanted.contains(&f.key))
                    .cloned()
                    .collect()
            }
            None => self.features.clone(),
        })
    }

    async fn feature_count(&self) -> Result<u64, DataError> {
        Ok(self.features.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;

    #[tokio::test]
    async fn test_read_filtered_by_keys() {
        let reader = MemoryReader::new(vec![
            SourceFeature::new(1, point!(x: 0.0, y: 0.0)),
            SourceFeature::new(2, point!(x: 1.0, y: 1.0)),
        ]);
        let features = reader
            .read_features(Some(&[FeatureKey::Int(2)]))
            .await
            .unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].key, FeatureKey::Int(2));
        assert_eq!(reader.feature_count().await.unwrap(), 2);
    }
}
