//! DuckDB spatial SQL dialect implementation

use super::SpatialDialect;
use crate::utils::sql::{quote_ident, quote_literal};

/// DuckDB (spatial extension) SQL dialect
pub struct DuckdbDialect;

impl SpatialDialect for DuckdbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn geom_from_text(&self, wkt: &str, _srid: u32) -> String {
        format!("ST_GeomFromText({})", quote_literal(wkt))
    }

    fn transform(&self, expr: &str, from_srid: u32, to_srid: u32) -> String {
        format!(
            "ST_Transform({}, 'EPSG:{}', 'EPSG:{}', always_xy := true)",
            expr, from_srid, to_srid
        )
    }

    fn union_agg(&self, expr: &str) -> String {
        format!("ST_Union_Agg({})", expr)
    }

    fn create_table_as(&self, table: &str, select: &str) -> String {
        format!("CREATE OR REPLACE TABLE {} AS {}", quote_ident(table), select)
    }

    fn create_spatial_index(&self, table: &str, geometry_field: &str, _srid: u32) -> Vec<String> {
        vec![format!(
            "CREATE INDEX {} ON {} USING RTREE ({})",
            quote_ident(&format!("{}_rtree", table)),
            quote_ident(table),
            quote_ident(geometry_field)
        )]
    }
}
