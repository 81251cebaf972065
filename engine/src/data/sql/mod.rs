//! Spatial SQL abstraction layer
//!
//! Generates spatial SQL that works across the engine's SQL backends
//! (PostGIS, Spatialite, DuckDB spatial).

mod dialect;
mod duckdb_dialect;
mod postgres_dialect;
mod sqlite_dialect;

pub use dialect::SpatialDialect;
pub use duckdb_dialect::DuckdbDialect;
pub use postgres_dialect::PostgisDialect;
pub use sqlite_dialect::SpatialiteDialect;

use serde::{Deserialize, Serialize};

/// SQL backend identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlBackend {
    Postgis,
    Spatialite,
    Duckdb,
}

impl SqlBackend {
    /// Get the SQL dialect for this backend
    pub fn dialect(&self) -> &'static dyn SpatialDialect {
        match self {
            SqlBackend::Postgis => &PostgisDialect,
            SqlBackend::Spatialite => &SpatialiteDialect,
            SqlBackend::Duckdb => &DuckdbDialect,
        }
    }

    /// Get the backend name
    pub fn name(&self) -> &'static str {
        match self {
            SqlBackend::Postgis => "postgis",
            SqlBackend::Spatialite => "spatialite",
            SqlBackend::Duckdb => "duckdb",
        }
    }
}

impl std::fmt::Display for SqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_names_match_backend() {
        for backend in [SqlBackend::Postgis, SqlBackend::Spatialite, SqlBackend::Duckdb] {
            assert_eq!(backend.dialect().name(), backend.name());
        }
    }
}
