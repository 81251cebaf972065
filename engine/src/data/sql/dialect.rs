//! Spatial SQL dialect trait for multi-backend support
//!
//! Each backend spells the same spatial operations slightly differently:
//! - Geometry constructors (`ST_GeomFromText` with or without an SRID)
//! - Reprojection (`ST_Transform` by SRID or by EPSG string)
//! - Aggregate union (`ST_Union` vs `ST_Union_Agg`)
//! - Spatial indexes (GiST, Spatialite R*Tree, DuckDB RTREE)

use crate::domain::filter::SpatialPredicate;
use crate::utils::sql::{quote_ident, quote_literal};

pub trait SpatialDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Geometry literal from WKT text
    ///
    /// - PostGIS / Spatialite: `ST_GeomFromText('wkt', srid)`
    /// - DuckDB: `ST_GeomFromText('wkt')` (geometries carry no SRID)
    fn geom_from_text(&self, wkt: &str, srid: u32) -> String {
        format!("ST_GeomFromText({}, {})", quote_literal(wkt), srid)
    }

    /// Reproject a geometry expression
    ///
    /// - PostGIS / Spatialite: `ST_Transform(expr, to)`
    /// - DuckDB: `ST_Transform(expr, 'EPSG:from', 'EPSG:to')`
    fn transform(&self, expr: &str, from_srid: u32, to_srid: u32) -> String;

    /// Buffer a geometry expression by a rendered distance literal
    fn buffer(&self, expr: &str, distance: &str) -> String {
        format!("ST_Buffer({}, {})", expr, distance)
    }

    /// Aggregate union over a geometry column
    fn union_agg(&self, expr: &str) -> String {
        format!("ST_Union({})", expr)
    }

    /// Binary spatial predicate call
    fn predicate(&self, predicate: SpatialPredicate, target: &str, reference: &str) -> String {
        format!("{}({}, {})", predicate.sql_function(), target, reference)
    }

    /// Statement that fails when a geometry fragment cannot be evaluated
    fn validation_query(&self, fragment: &str) -> String {
        format!("SELECT ST_IsValid({})", fragment)
    }

    /// Create a scratch table from a SELECT
    fn create_table_as(&self, table: &str, select: &str) -> String {
        format!("CREATE TABLE {} AS {}", quote_ident(table), select)
    }

    /// Statements building a spatial index on a scratch table's geometry column
    fn create_spatial_index(&self, table: &str, geometry_field: &str, srid: u32) -> Vec<String>;

    /// Statements dropping a scratch table and any index objects attached to it
    fn drop_table(&self, table: &str) -> Vec<String> {
        vec![format!("DROP TABLE IF EXISTS {}", quote_ident(table))]
    }
}
