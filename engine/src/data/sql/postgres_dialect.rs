//! PostGIS SQL dialect implementation

use super::SpatialDialect;
use crate::utils::sql::quote_ident;

/// PostGIS SQL dialect
pub struct PostgisDialect;

impl PostgisDialect {
    /// Materialized view holding the filtered keys and geometries of a relation
    pub fn create_materialized_view(&self, schema: &str, view: &str, select: &str) -> String {
        format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS {}.{} AS {}",
            quote_ident(schema),
            quote_ident(view),
            select
        )
    }

    pub fn refresh_materialized_view(&self, schema: &str, view: &str) -> String {
        format!(
            "REFRESH MATERIALIZED VIEW {}.{}",
            quote_ident(schema),
            quote_ident(view)
        )
    }

    pub fn drop_materialized_view(&self, schema: &str, view: &str) -> String {
        format!(
            "DROP MATERIALIZED VIEW IF EXISTS {}.{} CASCADE",
            quote_ident(schema),
            quote_ident(view)
        )
    }

    pub fn create_schema(&self, schema: &str) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
    }

    pub fn create_gist_index(&self, schema: &str, view: &str, geometry_field: &str) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}.{} USING GIST ({})",
            quote_ident(&format!("{}_gist", view)),
            quote_ident(schema),
            quote_ident(view),
            quote_ident(geometry_field)
        )
    }
}

impl SpatialDialect for PostgisDialect {
    fn name(&self) -> &'static str {
        "postgis"
    }

    fn transform(&self, expr: &str, _from_srid: u32, to_srid: u32) -> String {
        format!("ST_Transform({}, {})", expr, to_srid)
    }

    fn create_spatial_index(&self, table: &str, geometry_field: &str, _srid: u32) -> Vec<String> {
        vec![format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING GIST ({})",
            quote_ident(&format!("{}_gist", table)),
            quote_ident(table),
            quote_ident(geometry_field)
        )]
    }
}
