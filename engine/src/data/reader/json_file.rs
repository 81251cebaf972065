//! JSON feature-file reader
//!
//! Reads an array of `{ "id": ..., "wkt": ..., "attributes": {...} }` records.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use geo::Geometry;
use serde::Deserialize;
use serde_json::{Map, Value};
use wkt::TryFromWkt;

use super::{FeatureReader, SourceFeature};
use crate::data::error::DataError;
use crate::domain::dataset::FeatureKey;

#[derive(Debug, Deserialize)]
struct FeatureRecord {
    id: FeatureKey,
    wkt: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

pub struct JsonFileReader {
    dataset_id: String,
    path: PathBuf,
}

impl JsonFileReader {
    pub fn new(dataset_id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn load(&self) -> Result<Vec<SourceFeature>, DataError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            DataError::reader(&self.dataset_id, format!("{}: {}", self.path.display(), e))
        })?;
        let records: Vec<FeatureRecord> = serde_json::from_slice(&bytes)
            .map_err(|e| DataError::reader(&self.dataset_id, e.to_string()))?;

        records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let geometry = Geometry::<f64>::try_from_wkt_str(&record.wkt).map_err(|e| {
                    DataError::reader(
                        &self.dataset_id,
                        format!("record {} ({}): invalid WKT: {}", index, record.id, e),
                    )
                })?;
                Ok(SourceFeature {
                    key: record.id,
                    geometry,
                    attributes: record.attributes,
                })
            })
            .collect()
    }
}

#[async_trait]
impl FeatureReader for JsonFileReader {
    async fn read_features(
        &self,
        keys: Option<&[FeatureKey]>,
    ) -> Result<Vec<SourceFeature>, DataError> {
        let features = self.load().await?;
        Ok(match keys {
            Some(keys) => {
                let wanted: HashSet<&FeatureKey> = keys.iter().collect();
                features
                    .into_iter()
                    .filter(|f| wanted.contains(&f.key))
                    .collect()
            }
            None => features,
        })
    }

    async fn feature_count(&self) -> Result<u64, DataError> {
        Ok(self.load().await?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"id": 1, "wkt": "POINT (10 20)", "attributes": {"width": 4.5}},
        {"id": 2, "wkt": "LINESTRING (0 0, 1 1)"},
        {"id": "a'b", "wkt": "POLYGON ((0 0, 1 0, 1 1, 0 0))"}
    ]"#;

    #[tokio::test]
    async fn test_reads_all_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let reader = JsonFileReader::new("roads", &path);
        let features = reader.read_features(None).await.unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(features[0].attributes["width"], 4.5);
        assert_eq!(features[2].key, FeatureKey::Text("a'b".into()));
        assert_eq!(reader.feature_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reads_selected_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let reader = JsonFileReader::new("roads", &path);
        let features = reader
            .read_features(Some(&[FeatureKey::Int(2)]))
            .await
            .unwrap();
        assert_eq!(features.len(), 1);
        assert!(matches!(features[0].geometry, Geometry::LineString(_)));
    }

    #[tokio::test]
    async fn test_invalid_wkt_reports_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"[{"id": 7, "wkt": "POINT (oops)"}]"#).unwrap();

        let err = JsonFileReader::new("roads", &path)
            .read_features(None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("record 0 (7)"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = JsonFileReader::new("roads", "/nonexistent/features.json")
            .read_features(None)
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Reader { .. }));
    }
}
