//! Cache module
//!
//! Three independent in-memory stores (moka + dashmap):
//! - expression cache: compiled subset expressions per chain/target/geometry
//! - geometry cache: prepared source geometries per buffer and backend
//! - exploring cache: recent feature selections per dataset and selection mode

mod error;
mod key;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::CacheError;
pub use key::{ExploringKey, ExpressionKey, GeometryKey, SelectionMode, StoreKey};
pub use memory::{CacheEntry, CacheStats, CacheStore, StoreConfig};

use crate::core::config::CacheConfig;
use crate::domain::dataset::FeatureKey;
use crate::domain::geometry::PreparedGeometry;

/// Feature selection recorded while exploring a dataset
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExploredSelection {
    pub keys: Vec<FeatureKey>,
    /// Expression that produced the selection, for custom-expression mode
    #[serde(default)]
    pub expression: Option<String>,
}

/// Per-store statistics for diagnostics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheServiceStats {
    pub expressions: CacheStats,
    pub geometries: CacheStats,
    pub exploring: CacheStats,
}

/// The engine's cache layer
pub struct CacheService {
    pub expressions: CacheStore<ExpressionKey, String>,
    pub geometries: CacheStore<GeometryKey, Arc<PreparedGeometry>>,
    pub exploring: CacheStore<ExploringKey, Arc<ExploredSelection>>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("expressions", &self.expressions.name())
            .field("geometries", &self.geometries.name())
            .field("exploring", &self.exploring.name())
            .finish()
    }
}

impl CacheService {
    /// Create the three stores from configuration
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        Ok(Self {
            expressions: CacheStore::new(
                "expressions",
                StoreConfig {
                    ttl: Duration::from_secs(config.expression_ttl_secs),
                    max_entries: config.expression_max_entries,
                    max_datasets: None,
                },
            )?,
            geometries: CacheStore::new(
                "geometries",
                StoreConfig {
                    ttl: Duration::from_secs(config.geometry_ttl_secs),
                    max_entries: config.geometry_max_entries,
                    max_datasets: None,
                },
            )?,
            exploring: CacheStore::new(
                "exploring",
                StoreConfig {
                    ttl: Duration::from_secs(config.exploring_ttl_secs),
                    max_entries: config.exploring_max_entries,
                    max_datasets: Some(config.exploring_max_datasets),
                },
            )?,
        })
    }

    /// Record an exploration result for a dataset
    pub fn record_exploration(
        &self,
        dataset_id: &str,
        mode: SelectionMode,
        selection: ExploredSelection,
    ) {
        self.exploring
            .put(&ExploringKey::new(dataset_id, mode), Arc::new(selection));
    }

    pub fn exploration(&self, dataset_id: &str, mode: SelectionMode) -> Option<Arc<ExploredSelection>> {
        self.exploring.get(&ExploringKey::new(dataset_id, mode))
    }

    /// Drop everything cached for a dataset whose data or subset changed
    pub fn invalidate_dataset(&self, dataset_id: &str) {
        self.expressions.invalidate_dataset(dataset_id);
        self.geometries.invalidate_dataset(dataset_id);
        self.exploring.invalidate_dataset(dataset_id);
    }

    pub fn invalidate_all(&self) {
        self.expressions.invalidate_all();
        self.geometries.invalidate_all();
        self.exploring.invalidate_all();
    }

    pub fn stats(&self) -> CacheServiceStats {
        CacheServiceStats {
            expressions: self.expressions.stats(),
            geometries: self.geometries.stats(),
            exploring: self.exploring.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_from_default_config() {
        let cache = CacheService::new(&CacheConfig::default()).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.exploring.entry_count, 0);
    }

    #[test]
    fn test_exploration_roundtrip_and_invalidation() {
        let cache = CacheService::new(&CacheConfig::default()).unwrap();
        let selection = ExploredSelection {
            keys: vec![FeatureKey::Int(1), FeatureKey::Int(2)],
            expression: None,
        };
        cache.record_exploration("roads", SelectionMode::MultipleFeatures, selection.clone());
        assert_eq!(
            cache
                .exploration("roads", SelectionMode::MultipleFeatures)
                .as_deref(),
            Some(&selection)
        );
        assert!(cache.exploration("roads", SelectionMode::SingleFeature).is_none());

        cache.invalidate_dataset("roads");
        assert!(cache.exploration("roads", SelectionMode::MultipleFeatures).is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CacheConfig {
            exploring_max_datasets: 0,
            ..CacheConfig::default()
        };
        assert!(CacheService::new(&config).is_err());
    }
}
