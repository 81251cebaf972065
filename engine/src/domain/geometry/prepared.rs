//! Backend-scoped geometry references

use std::sync::Arc;

use geo::Geometry;
use wkt::ToWkt;

use crate::data::sql::SpatialDialect;
use crate::domain::dataset::ProviderKind;
use crate::domain::error::EngineError;
use crate::domain::geometry::crs;

/// Geometric shape class of a source selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeClass {
    Point,
    Line,
    Polygon,
    Mixed,
}

impl ShapeClass {
    pub fn of(geometry: &Geometry<f64>) -> Self {
        match geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => ShapeClass::Point,
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                ShapeClass::Line
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => ShapeClass::Polygon,
            Geometry::GeometryCollection(_) => ShapeClass::Mixed,
        }
    }

    /// Common class of several geometries
    pub fn common<'a>(geometries: impl IntoIterator<Item = &'a Geometry<f64>>) -> Option<Self> {
        geometries.into_iter().map(Self::of).reduce(|a, b| if a == b { a } else { ShapeClass::Mixed })
    }
}

/// How a backend refers to the prepared source geometry
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryReference {
    /// SQL expression evaluating to the reference geometry
    Sql {
        fragment: String,
        /// Relation the fragment reads from, when it is a subquery
        relation: Option<String>,
    },
    /// Dissolved geometry held in memory
    Memory(Arc<Geometry<f64>>),
    /// Well-known text of the reference geometry
    Wkt(String),
}

/// Possibly buffered source geometry prepared for one provider kind
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedGeometry {
    pub reference: GeometryReference,
    /// EPSG code the reference is expressed in
    pub srid: u32,
    pub provider_kind: ProviderKind,
    pub shape: Option<ShapeClass>,
    pub buffered: bool,
    /// Content hash used in cache keys and artifact names
    pub fingerprint: String,
    /// Source features left out of the reference, with the reason
    pub skipped: Vec<String>,
}

impl PreparedGeometry {
    pub fn sql(&self) -> Option<&str> {
        match &self.reference {
            GeometryReference::Sql { fragment, .. } => Some(fragment),
            _ => None,
        }
    }

    /// SQL expression for the reference in `dialect`; `None` for in-memory
    /// references
    pub fn sql_in(&self, dialect: &dyn SpatialDialect) -> Option<String> {
        match &self.reference {
            GeometryReference::Sql { fragment, .. } => Some(fragment.clone()),
            GeometryReference::Wkt(text) => Some(dialect.geom_from_text(text, self.srid)),
            GeometryReference::Memory(_) => None,
        }
    }

    /// Relation referenced by the geometry, if any
    pub fn relation(&self) -> Option<&str> {
        match &self.reference {
            GeometryReference::Sql { relation, .. } => relation.as_deref(),
            _ => None,
        }
    }

    pub fn memory(&self) -> Option<&Arc<Geometry<f64>>> {
        match &self.reference {
            GeometryReference::Memory(geometry) => Some(geometry),
            _ => None,
        }
    }

    /// WKT form of an in-memory or WKT reference
    pub fn to_wkt(&self) -> Option<String> {
        match &self.reference {
            GeometryReference::Memory(geometry) => Some(geometry.wkt_string()),
            GeometryReference::Wkt(text) => Some(text.clone()),
            GeometryReference::Sql { .. } => None,
        }
    }

    /// In-memory reference reprojected into `srid`
    pub fn memory_in(&self, srid: u32) -> Result<Arc<Geometry<f64>>, EngineError> {
        let geometry = self.memory().ok_or_else(|| {
            EngineError::geometry("prepared geometry has no in-memory representation")
        })?;
        if srid == self.srid {
            return Ok(Arc::clone(geometry));
        }
        Ok(Arc::new(crs::transform(geometry, self.srid, srid)?))
    }
}

/// Outcome of preparing a geometry for a provider kind
#[derive(Debug, Clone)]
pub enum Prepared {
    Ready(Arc<PreparedGeometry>),
    /// The requested strategy failed and a fallback geometry was produced
    Degraded {
        geometry: Arc<PreparedGeometry>,
        reason: String,
    },
}

impl Prepared {
    pub fn geometry(&self) -> &Arc<PreparedGeometry> {
        match self {
            Prepared::Ready(geometry) | Prepared::Degraded { geometry, .. } => geometry,
        }
    }

    pub fn degradation(&self) -> Option<&str> {
        match self {
            Prepared::Ready(_) => None,
            Prepared::Degraded { reason, .. } => Some(reason),
        }
    }
}
