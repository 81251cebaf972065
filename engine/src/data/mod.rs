//! Data access layer
//!
//! Provides the storage-facing side of the engine:
//! - `sql` - Spatial SQL dialects (PostGIS, Spatialite, DuckDB spatial)
//! - `executor` - Statement execution per SQL backend
//! - `reader` - Feature readers for datasets without SQL capability
//! - `subset` - Subset targets holding a dataset's active filter
//! - `connector` - Per-run dataset handles
//! - `cache` - Expression, geometry and exploring caches
//! - `error` - Unified error type for all backends

pub mod cache;
pub mod connector;
pub mod error;
pub mod executor;
pub mod reader;
pub mod sql;
pub mod subset;

pub use cache::{CacheService, CacheServiceStats, ExploredSelection, SelectionMode};
pub use connector::{DatasetBinding, DatasetConnector, DatasetHandle, RegistryConnector};
pub use error::DataError;
pub use executor::{
    DuckdbExecutor, PostgisExecutor, RecordingExecutor, SpatialiteExecutor, SqlExecutor,
};
pub use reader::{FeatureReader, JsonFileReader, MemoryReader, SourceFeature};
pub use sql::{SpatialDialect, SqlBackend};
pub use subset::{MemorySubset, SubsetStore, SubsetTarget};
