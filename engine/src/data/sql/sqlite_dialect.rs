//! Spatialite SQL dialect implementation

use super::SpatialDialect;
use crate::utils::sql::{quote_ident, quote_literal};

/// Spatialite (SQLite + mod_spatialite) SQL dialect
pub struct SpatialiteDialect;

impl SpatialDialect for SpatialiteDialect {
    fn name(&self) -> &'static str {
        "spatialite"
    }

    fn transform(&self, expr: &str, _from_srid: u32, to_srid: u32) -> String {
        format!("ST_Transform({}, {})", expr, to_srid)
    }

    fn union_agg(&self, expr: &str) -> String {
        // Spatialite exposes the aggregate as GUnion
        format!("GUnion({})", expr)
    }

    fn create_spatial_index(&self, table: &str, geometry_field: &str, srid: u32) -> Vec<String> {
        // CTAS leaves the column unregistered; register it before indexing
        vec![
            format!(
                "SELECT RecoverGeometryColumn({}, {}, {}, 'GEOMETRY', 'XY')",
                quote_literal(table),
                quote_literal(geometry_field),
                srid
            ),
            format!(
                "SELECT CreateSpatialIndex({}, {})",
                quote_literal(table),
                quote_literal(geometry_field)
            ),
        ]
    }

    fn drop_table(&self, table: &str) -> Vec<String> {
        vec![
            format!("SELECT DisableSpatialIndex({}, NULL)", quote_literal(table)),
            format!("DROP TABLE IF EXISTS {}", quote_ident(&format!("idx_{}", table))),
            format!("DROP TABLE IF EXISTS {}", quote_ident(table)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_agg() {
        assert_eq!(SpatialiteDialect.union_agg("\"geom\""), "GUnion(\"geom\")");
    }

    #[test]
    fn test_create_spatial_index() {
        let stmts = SpatialiteDialect.create_spatial_index("geofilter_tmp_1", "geom", 3857);
        assert_eq!(stmts.len(), 2);
        assert_eq!(
            stmts[0],
            "SELECT RecoverGeometryColumn('geofilter_tmp_1', 'geom', 3857, 'GEOMETRY', 'XY')"
        );
        assert_eq!(stmts[1], "SELECT CreateSpatialIndex('geofilter_tmp_1', 'geom')");
    }

    #[test]
    fn test_drop_table_removes_index() {
        let stmts = SpatialiteDialect.drop_table("geofilter_tmp_1");
        assert_eq!(stmts.last().unwrap(), "DROP TABLE IF EXISTS \"geofilter_tmp_1\"");
        assert!(stmts.iter().any(|s| s.contains("idx_geofilter_tmp_1")));
    }
}
