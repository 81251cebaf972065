//! Backend strategies
//!
//! One closed enum per provider tier, sharing a contract:
//! - `build_expression` - compile the chain for the dataset
//! - `materialize` - persist the filtered result where the backend supports it
//! - `apply` - point the dataset's subset at the result
//! - `cleanup` - drop objects created by `materialize`

mod embedded_sql;
mod full_sql;
mod generic_reader;

use serde::{Deserialize, Serialize};

use crate::data::connector::DatasetHandle;
use crate::data::executor::SqlExecutor;
use crate::core::constants::ARTIFACT_HASH_LEN;
use crate::domain::dataset::{FeatureKey, ProviderKind};
use crate::domain::error::EngineError;
use crate::domain::filter::FilterChain;
use crate::domain::geometry::PreparedGeometry;

/// Inputs shared by every strategy step for one dataset
#[derive(Clone, Copy)]
pub struct StrategyJob<'a> {
    pub handle: &'a DatasetHandle,
    pub chain: &'a FilterChain,
    /// Prepared source geometry, when the chain has spatial filters
    pub geometry: Option<&'a PreparedGeometry>,
    /// Schema holding materialized views on full SQL backends
    pub scratch_schema: &'a str,
}

impl<'a> StrategyJob<'a> {
    fn executor(&self) -> Result<&'a dyn SqlExecutor, EngineError> {
        self.handle.sql.as_deref().ok_or_else(|| {
            EngineError::metadata(
                &self.handle.descriptor.dataset_id,
                "dataset offers no SQL executor",
            )
        })
    }

    /// Deterministic object name from the dataset, chain and geometry
    pub fn artifact_name(&self, prefix: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.handle.descriptor.dataset_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.chain.fingerprint().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.geometry.map(|g| g.fingerprint.as_str()).unwrap_or("-").as_bytes());
        let hex = hasher.finalize().to_hex();
        format!("{}{}", prefix, &hex[..ARTIFACT_HASH_LEN])
    }
}

/// Expression compiled for a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub expression: String,
    /// Keys selected in memory on the generic reader path
    pub selected: Option<Vec<FeatureKey>>,
}

impl Compiled {
    pub fn sql(expression: String) -> Self {
        Self {
            expression,
            selected: None,
        }
    }
}

/// Filter artifact produced by `materialize`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaterializationRef {
    MaterializedView {
        schema: String,
        name: String,
        subset: String,
    },
    TempTable {
        name: String,
        subset: String,
    },
    KeySet {
        keys: Vec<FeatureKey>,
        subset: String,
    },
}

impl MaterializationRef {
    /// Subset expression `apply` installs on the dataset
    pub fn subset(&self) -> &str {
        match self {
            MaterializationRef::MaterializedView { subset, .. }
            | MaterializationRef::TempTable { subset, .. }
            | MaterializationRef::KeySet { subset, .. } => subset,
        }
    }

    /// Name of the persisted object, if one was created
    pub fn artifact(&self) -> Option<String> {
        match self {
            MaterializationRef::MaterializedView { schema, name, .. } => {
                Some(format!("{}.{}", schema, name))
            }
            MaterializationRef::TempTable { name, .. } => Some(name.clone()),
            MaterializationRef::KeySet { .. } => None,
        }
    }
}

/// Strategy for one provider tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendStrategy {
    FullSql,
    EmbeddedSql,
    GenericReader,
}

impl BackendStrategy {
    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::FullSql => BackendStrategy::FullSql,
            ProviderKind::EmbeddedSql => BackendStrategy::EmbeddedSql,
            ProviderKind::GenericReader => BackendStrategy::GenericReader,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            BackendStrategy::FullSql => ProviderKind::FullSql,
            BackendStrategy::EmbeddedSql => ProviderKind::EmbeddedSql,
            BackendStrategy::GenericReader => ProviderKind::GenericReader,
        }
    }

    pub async fn build_expression(&self, job: &StrategyJob<'_>) -> Result<Compiled, EngineError> {
        match self {
            BackendStrategy::FullSql => full_sql::build_expression(job),
            BackendStrategy::EmbeddedSql => embedded_sql::build_expression(job),
            BackendStrategy::GenericReader => generic_reader::build_expression(job).await,
        }
    }

    pub async fn materialize(
        &self,
        job: &StrategyJob<'_>,
        compiled: &Compiled,
    ) -> Result<MaterializationRef, EngineError> {
        match self {
            BackendStrategy::FullSql => full_sql::materialize(job, compiled).await,
            BackendStrategy::EmbeddedSql => embedded_sql::materialize(job, compiled).await,
            BackendStrategy::GenericReader => Ok(generic_reader::materialize(compiled)),
        }
    }

    /// Install the artifact's subset on the dataset; `false` when the subset
    /// was already in place
    pub async fn apply(
        &self,
        reference: &MaterializationRef,
        handle: &DatasetHandle,
    ) -> Result<bool, EngineError> {
        let current = handle.subset.current_subset().await?;
        if current == reference.subset() {
            tracing::debug!(dataset = %handle.descriptor.dataset_id, "Subset already applied");
            return Ok(false);
        }
        handle.subset.set_subset(reference.subset()).await.map_err(|e| {
            EngineError::materialization(&handle.descriptor.dataset_id, e.to_string())
        })?;
        tracing::debug!(
            dataset = %handle.descriptor.dataset_id,
            strategy = ?self,
            "Subset applied"
        );
        Ok(true)
    }

    /// Drop objects created by `materialize`
    pub async fn cleanup(
        &self,
        reference: &MaterializationRef,
        handle: &DatasetHandle,
    ) -> Result<(), EngineError> {
        match (self, reference) {
            (BackendStrategy::FullSql, MaterializationRef::MaterializedView { schema, name, .. }) => {
                full_sql::drop_view(handle, schema, name).await
            }
            (BackendStrategy::EmbeddedSql, MaterializationRef::TempTable { name, .. }) => {
                embedded_sql::drop_table(handle, name).await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::data::connector::DatasetBinding;
    use crate::data::subset::MemorySubset;
    use crate::domain::dataset::fixtures::descriptor;
    use crate::domain::filter::Filter;

    pub(super) fn handle(kind: ProviderKind, subset: Arc<MemorySubset>) -> DatasetHandle {
        let binding = DatasetBinding::new(subset);
        DatasetHandle {
            descriptor: descriptor("roads", kind),
            sql: binding.sql,
            reader: binding.reader,
            subset: binding.subset,
            feature_count_estimate: None,
        }
    }

    #[test]
    fn test_artifact_name_deterministic() {
        let subset = Arc::new(MemorySubset::default());
        let h = handle(ProviderKind::FullSql, subset);
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::custom("\"a\" = 1"));
        let job = StrategyJob {
            handle: &h,
            chain: &chain,
            geometry: None,
            scratch_schema: "geofilter",
        };
        let name = job.artifact_name("mv_");
        assert_eq!(name, job.artifact_name("mv_"));
        assert_eq!(name.len(), 3 + ARTIFACT_HASH_LEN);

        let mut other = FilterChain::new("roads");
        other.add(Filter::custom("\"a\" = 2"));
        let job2 = StrategyJob { chain: &other, ..job };
        assert_ne!(name, job2.artifact_name("mv_"));
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let subset = Arc::new(MemorySubset::default());
        let h = handle(ProviderKind::GenericReader, Arc::clone(&subset));
        let reference = MaterializationRef::KeySet {
            keys: vec![FeatureKey::Int(1)],
            subset: "\"id\" IN (1)".into(),
        };
        let strategy = BackendStrategy::GenericReader;
        assert!(strategy.apply(&reference, &h).await.unwrap());
        assert!(!strategy.apply(&reference, &h).await.unwrap());
        assert_eq!(subset.applied(), vec!["\"id\" IN (1)".to_string()]);
    }

    #[test]
    fn test_artifact_names() {
        let view = MaterializationRef::MaterializedView {
            schema: "geofilter".into(),
            name: "mv_x".into(),
            subset: String::new(),
        };
        assert_eq!(view.artifact().as_deref(), Some("geofilter.mv_x"));
        let keys = MaterializationRef::KeySet {
            keys: Vec::new(),
            subset: "1=0".into(),
        };
        assert!(keys.artifact().is_none());
        assert_eq!(keys.subset(), "1=0");
    }
}
