//! JSON request files driving `geofilter run`
//!
//! ```json
//! {
//!   "action": "filter",
//!   "source": { "dataset_id": "parcels", ... },
//!   "targets": [{ "dataset_id": "roads", ... }],
//!   "chain": [{ "kind": "attribute_expression", "payload": "\"status\" = 'active'" }],
//!   "source_keys": [1, 2],
//!   "buffer": { "type": "fixed", "value": 50 },
//!   "datasets": { "parcels": { "features": "parcels.json" } }
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::dataset::{DatasetDescriptor, FeatureKey};
use crate::domain::filter::{FilterChain, parse_chain};
use crate::domain::geometry::BufferSpec;
use crate::domain::orchestrator::{FilterAction, RunOptions};

/// Local files backing a dataset
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetFiles {
    /// JSON feature file (`[{ "id", "wkt", "attributes" }]`), enables the in-memory path
    pub features: Option<PathBuf>,
    /// Feature count estimate, used for performance warnings only
    pub feature_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub action: FilterAction,
    #[serde(default)]
    pub source: Option<DatasetDescriptor>,
    pub targets: Vec<DatasetDescriptor>,
    /// Chain object or bare filter array; empty when absent
    #[serde(default)]
    pub chain: Option<serde_json::Value>,
    #[serde(default)]
    pub source_keys: Option<Vec<FeatureKey>>,
    #[serde(default)]
    pub buffer: Option<BufferSpec>,
    #[serde(default)]
    pub metric_srid: Option<u32>,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetFiles>,
}

impl RunRequest {
    /// Load a request file; relative feature paths resolve against its directory
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading run request");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?;
        let mut request: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse request file: {}", path.display()))?;

        if let Some(base) = path.parent() {
            for files in request.datasets.values_mut() {
                files.features = files
                    .features
                    .take()
                    .map(|f| if f.is_relative() { base.join(f) } else { f });
            }
        }

        request.validate()?;
        Ok(request)
    }

    fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            anyhow::bail!("Request error: at least one target dataset is required");
        }
        for descriptor in self.descriptors() {
            if descriptor.dataset_id.trim().is_empty() {
                anyhow::bail!("Request error: dataset_id must not be empty");
            }
        }
        if let Some(buffer) = &self.buffer {
            buffer.validate()?;
        }
        Ok(())
    }

    /// Dataset that owns the chain
    fn chain_owner(&self) -> &str {
        self.source
            .as_ref()
            .or_else(|| self.targets.first())
            .map(|d| d.dataset_id.as_str())
            .unwrap_or_default()
    }

    pub fn chain(&self) -> Result<FilterChain> {
        let owner = self.chain_owner();
        match &self.chain {
            None | Some(serde_json::Value::Null) => Ok(FilterChain::new(owner)),
            Some(value) => {
                let text = serde_json::to_string(value)?;
                Ok(parse_chain(&text, owner)?)
            }
        }
    }

    /// Source followed by targets, each dataset once
    pub fn descriptors(&self) -> Vec<&DatasetDescriptor> {
        let mut seen = HashSet::new();
        self.source
            .iter()
            .chain(self.targets.iter())
            .filter(|d| seen.insert(d.dataset_id.clone()))
            .collect()
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            source_keys: self.source_keys.clone(),
            buffer: self.buffer.clone(),
            metric_srid: self.metric_srid,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dataset::ProviderKind;

    const REQUEST: &str = r#"{
        "action": "filter",
        "source": {
            "dataset_id": "parcels", "provider_kind": "generic_reader",
            "table_name": "parcels", "geometry_field": "geom",
            "primary_key_field": "id", "srid": 3857
        },
        "targets": [{
            "dataset_id": "roads", "provider_kind": "full_sql", "schema_name": "public",
            "table_name": "roads", "geometry_field": "geom",
            "primary_key_field": "id", "srid": 3857
        }],
        "source_keys": [1, 2],
        "buffer": { "type": "fixed", "value": 50 },
        "datasets": { "parcels": { "features": "parcels.json" } }
    }"#;

    #[test]
    fn test_load_resolves_relative_feature_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(&path, REQUEST).unwrap();

        let request = RunRequest::load(&path).unwrap();
        assert_eq!(request.action, FilterAction::Filter);
        assert_eq!(request.targets[0].provider_kind, ProviderKind::FullSql);
        assert_eq!(
            request.datasets["parcels"].features,
            Some(dir.path().join("parcels.json"))
        );
        let options = request.run_options();
        assert_eq!(options.source_keys.as_ref().unwrap().len(), 2);
        assert_eq!(options.buffer, Some(BufferSpec::Fixed(50.0)));
    }

    #[test]
    fn test_missing_chain_is_empty() {
        let request: RunRequest = serde_json::from_str(REQUEST).unwrap();
        let chain = request.chain().unwrap();
        assert!(chain.is_empty());
        assert_eq!(chain.dataset_id, "parcels");
    }

    #[test]
    fn test_descriptors_deduplicated() {
        let mut request: RunRequest = serde_json::from_str(REQUEST).unwrap();
        let source = request.source.clone().unwrap();
        request.targets.push(source);
        let ids: Vec<&str> = request
            .descriptors()
            .iter()
            .map(|d| d.dataset_id.as_str())
            .collect();
        assert_eq!(ids, vec!["parcels", "roads"]);
    }

    #[test]
    fn test_no_targets_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(&path, r#"{ "action": "reset", "targets": [] }"#).unwrap();
        let err = RunRequest::load(&path).unwrap_err();
        assert!(err.to_string().contains("target"));
    }
}
