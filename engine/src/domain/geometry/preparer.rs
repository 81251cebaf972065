//! Source geometry preparation per provider kind
//!
//! - Full SQL: an SQL fragment, a subquery over the source relation when the
//!   source lives on the same backend, otherwise embedded WKT
//! - Embedded SQL: the same fragment, checked by a validation query; a failed
//!   query degrades to the in-memory path
//! - Generic reader: per-feature buffering and dissolve in memory

use std::collections::BTreeMap;
use std::sync::Arc;

use geo::{
    Area, BooleanOps, Buffer, CoordsIter, Geometry, GeometryCollection, LineString,
    MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};
use wkt::ToWkt;

use super::buffer::BufferSpec;
use super::crs;
use super::prepared::{GeometryReference, Prepared, PreparedGeometry, ShapeClass};
use crate::core::constants::SQL_DISTANCE_DECIMALS;
use crate::data::executor::SqlExecutor;
use crate::data::reader::SourceFeature;
use crate::data::sql::SqlBackend;
use crate::domain::compiler::key_list;
use crate::domain::dataset::{DatasetDescriptor, FeatureKey, ProviderKind};
use crate::domain::error::EngineError;
use crate::utils::sql::numeric_literal;

/// Selected source features for one run
#[derive(Debug, Clone)]
pub struct SourceSelection {
    pub descriptor: DatasetDescriptor,
    pub keys: Vec<FeatureKey>,
    /// Features read for the selected keys; may be empty when the source is
    /// only reachable through SQL
    pub features: Vec<SourceFeature>,
    /// SQL backend the source relation lives on
    pub backend: Option<SqlBackend>,
}

impl SourceSelection {
    /// Hash of the dataset id and the sorted selected keys
    pub fn fingerprint(&self) -> String {
        let mut keys: Vec<String> = self.keys.iter().map(|k| k.to_string()).collect();
        keys.sort();
        keys.dedup();
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.descriptor.dataset_id.as_bytes());
        for key in &keys {
            hasher.update(&[0]);
            hasher.update(key.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Inputs for preparing the source geometry for one provider group
#[derive(Clone, Copy)]
pub struct PrepareRequest<'a> {
    pub source: &'a SourceSelection,
    pub kind: ProviderKind,
    /// SQL backend of the target group; required for SQL provider kinds
    pub backend: Option<SqlBackend>,
    pub buffer: Option<&'a BufferSpec>,
    /// CRS buffer distances are measured in
    pub metric_srid: u32,
    /// Executor used to validate embedded SQL fragments
    pub validator: Option<&'a dyn SqlExecutor>,
}

/// Prepare the source geometry for `request.kind`
pub async fn prepare(request: PrepareRequest<'_>) -> Result<Prepared, EngineError> {
    if let Some(spec) = request.buffer {
        spec.validate()?;
    }

    match request.kind {
        ProviderKind::FullSql => {
            let backend = sql_backend(&request)?;
            let prepared = prepare_sql(&request, backend)?;
            tracing::debug!(
                source = %request.source.descriptor.dataset_id,
                backend = %backend,
                srid = prepared.srid,
                "Prepared SQL geometry reference"
            );
            Ok(Prepared::Ready(Arc::new(prepared)))
        }
        ProviderKind::EmbeddedSql => {
            let backend = sql_backend(&request)?;
            match validate_sql(&request, backend).await {
                Ok(prepared) => Ok(Prepared::Ready(Arc::new(prepared))),
                Err(reason) => {
                    tracing::warn!(
                        source = %request.source.descriptor.dataset_id,
                        backend = %backend,
                        reason = %reason,
                        "Embedded SQL geometry unusable, falling back to in-memory preparation"
                    );
                    let fallback = prepare_in_memory(&request).await.map_err(|e| {
                        EngineError::geometry(format!(
                            "{} failed ({}) and in-memory fallback failed: {}",
                            backend, reason, e
                        ))
                    })?;
                    Ok(Prepared::Degraded {
                        geometry: Arc::new(fallback),
                        reason,
                    })
                }
            }
        }
        ProviderKind::GenericReader => {
            Ok(Prepared::Ready(Arc::new(prepare_in_memory(&request).await?)))
        }
    }
}

fn sql_backend(request: &PrepareRequest<'_>) -> Result<SqlBackend, EngineError> {
    request.backend.ok_or_else(|| {
        EngineError::geometry(format!(
            "{} preparation requested without an SQL backend",
            request.kind
        ))
    })
}

async fn validate_sql(request: &PrepareRequest<'_>, backend: SqlBackend) -> Result<PreparedGeometry, String> {
    let prepared = prepare_sql(request, backend).map_err(|e| e.to_string())?;
    if let Some(executor) = request.validator {
        let dialect = backend.dialect();
        let fragment = prepared
            .sql_in(dialect)
            .ok_or_else(|| "prepared reference has no SQL form".to_string())?;
        executor
            .validate(&dialect.validation_query(&fragment))
            .await
            .map_err(|e| format!("validation failed: {}", e))?;
    }
    Ok(prepared)
}

fn fingerprint_of(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

fn prepare_sql(request: &PrepareRequest<'_>, backend: SqlBackend) -> Result<PreparedGeometry, EngineError> {
    let source = request.source;
    let desc = &source.descriptor;
    let dialect = backend.dialect();
    let decimals = request.kind.distance_precision().unwrap_or(SQL_DISTANCE_DECIMALS);
    let srid = if request.buffer.is_some() {
        request.metric_srid
    } else {
        desc.srid
    };
    let shape = ShapeClass::common(source.features.iter().map(|f| &f.geometry));

    let in_place = source.backend == Some(backend)
        && !source.keys.is_empty()
        && !matches!(request.buffer, Some(BufferSpec::Expression(_)));

    if in_place {
        let column = format!("s.{}", desc.quoted_geometry_field());
        let geometry = if srid != desc.srid {
            dialect.transform(&column, desc.srid, srid)
        } else {
            column
        };
        let keys = key_list(
            &format!("s.{}", desc.quoted_primary_key()),
            &source.keys,
            desc.primary_key_type,
        )?;
        let mut fragment = format!(
            "(SELECT {} FROM {} AS s WHERE {})",
            dialect.union_agg(&geometry),
            desc.relation(),
            keys
        );
        if let Some(BufferSpec::Fixed(distance)) = request.buffer {
            fragment = dialect.buffer(&fragment, &numeric_literal(*distance, decimals));
        }
        return Ok(PreparedGeometry {
            fingerprint: fingerprint_of(&[request.kind.as_str(), backend.name(), &fragment]),
            reference: GeometryReference::Sql {
                fragment,
                relation: Some(desc.relation()),
            },
            srid,
            provider_kind: request.kind,
            shape,
            buffered: request.buffer.is_some(),
            skipped: Vec::new(),
        });
    }

    if source.features.is_empty() {
        return Err(EngineError::geometry(format!(
            "no features of {} available to embed",
            desc.dataset_id
        )));
    }

    let Some(spec) = request.buffer else {
        let wkt = collect_typed(
            source.features.iter().map(|f| f.geometry.clone()).collect(),
            shape.unwrap_or(ShapeClass::Mixed),
        )
        .wkt_string();
        return Ok(PreparedGeometry {
            fingerprint: fingerprint_of(&[request.kind.as_str(), backend.name(), &wkt]),
            reference: GeometryReference::Wkt(wkt),
            srid,
            provider_kind: request.kind,
            shape,
            buffered: false,
            skipped: Vec::new(),
        });
    };

    // One buffered part per distinct rounded distance
    let mut groups: BTreeMap<String, Vec<Geometry<f64>>> = BTreeMap::new();
    let mut skipped = Vec::new();
    for feature in &source.features {
        match spec.distance_for(&feature.attributes, request.kind.distance_precision()) {
            Ok(distance) => groups
                .entry(numeric_literal(distance, decimals))
                .or_default()
                .push(feature.geometry.clone()),
            Err(e) => {
                tracing::warn!(feature = %feature.key, error = %e, "Skipping source feature");
                skipped.push(format!("{}: {}", feature.key, e));
            }
        }
    }

    let parts: Vec<String> = groups
        .into_iter()
        .map(|(distance, geometries)| {
            let wkt = collect_typed(geometries, shape.unwrap_or(ShapeClass::Mixed)).wkt_string();
            let mut expr = dialect.geom_from_text(&wkt, desc.srid);
            if desc.srid != srid {
                expr = dialect.transform(&expr, desc.srid, srid);
            }
            dialect.buffer(&expr, &distance)
        })
        .collect();

    let fragment = parts
        .into_iter()
        .reduce(|acc, part| format!("ST_Union({}, {})", acc, part))
        .ok_or_else(|| EngineError::geometry("no source feature could be buffered"))?;

    Ok(PreparedGeometry {
        fingerprint: fingerprint_of(&[request.kind.as_str(), backend.name(), &fragment]),
        reference: GeometryReference::Sql {
            fragment,
            relation: None,
        },
        srid,
        provider_kind: request.kind,
        shape,
        buffered: true,
        skipped,
    })
}

async fn prepare_in_memory(request: &PrepareRequest<'_>) -> Result<PreparedGeometry, EngineError> {
    let source = request.source;
    let features = source.features.clone();
    let buffer = request.buffer.cloned();
    let source_srid = source.descriptor.srid;
    let metric_srid = request.metric_srid;
    let fingerprint = fingerprint_of(&[
        ProviderKind::GenericReader.as_str(),
        &source.fingerprint(),
        &buffer.as_ref().map(BufferSpec::fingerprint).unwrap_or_default(),
        &metric_srid.to_string(),
    ]);

    let outcome = tokio::task::spawn_blocking(move || {
        dissolve_features(&features, source_srid, buffer.as_ref(), metric_srid)
    })
    .await
    .map_err(|e| EngineError::geometry(format!("geometry task failed: {}", e)))??;

    tracing::debug!(
        source = %source.descriptor.dataset_id,
        shape = ?outcome.shape,
        skipped = outcome.skipped.len(),
        srid = outcome.srid,
        "Prepared in-memory geometry reference"
    );

    Ok(PreparedGeometry {
        reference: GeometryReference::Memory(Arc::new(outcome.geometry)),
        srid: outcome.srid,
        provider_kind: ProviderKind::GenericReader,
        shape: outcome.shape,
        buffered: request.buffer.is_some(),
        fingerprint,
        skipped: outcome.skipped,
    })
}

struct MemoryOutcome {
    geometry: Geometry<f64>,
    srid: u32,
    shape: Option<ShapeClass>,
    skipped: Vec<String>,
}

fn dissolve_features(
    features: &[SourceFeature],
    source_srid: u32,
    buffer: Option<&BufferSpec>,
    metric_srid: u32,
) -> Result<MemoryOutcome, EngineError> {
    if features.is_empty() {
        return Err(EngineError::geometry("source selection has no features"));
    }
    let shape = ShapeClass::common(features.iter().map(|f| &f.geometry));

    let Some(spec) = buffer else {
        let geometry = collect_typed(
            features.iter().map(|f| f.geometry.clone()).collect(),
            shape.unwrap_or(ShapeClass::Mixed),
        );
        return Ok(MemoryOutcome {
            geometry,
            srid: source_srid,
            shape,
            skipped: Vec::new(),
        });
    };

    if !crs::can_transform(source_srid, metric_srid) {
        return Err(EngineError::geometry(format!(
            "cannot reproject EPSG:{} to metric EPSG:{} in memory",
            source_srid, metric_srid
        )));
    }

    let mut skipped = Vec::new();
    let mut dissolved: Option<MultiPolygon<f64>> = None;
    for feature in features {
        let buffered = spec
            .distance_for(&feature.attributes, None)
            .and_then(|distance| {
                let projected = crs::transform(&feature.geometry, source_srid, metric_srid)?;
                Ok(repair(projected.buffer(distance)))
            });
        match buffered {
            Ok(polygons) if polygons.0.is_empty() => {
                tracing::warn!(feature = %feature.key, "Buffer produced an empty geometry, skipping");
                skipped.push(format!("{}: buffer produced an empty geometry", feature.key));
            }
            Ok(polygons) => {
                dissolved = Some(match dissolved {
                    Some(acc) => acc.union(&polygons),
                    None => polygons,
                });
            }
            Err(e) => {
                tracing::warn!(feature = %feature.key, error = %e, "Buffer failed, skipping");
                skipped.push(format!("{}: {}", feature.key, e));
            }
        }
    }

    let geometry = dissolved
        .ok_or_else(|| EngineError::geometry("no source feature could be buffered"))?;
    Ok(MemoryOutcome {
        geometry: Geometry::MultiPolygon(geometry),
        srid: metric_srid,
        shape,
        skipped,
    })
}

/// Drop degenerate or non-finite polygons from a buffer result
fn repair(polygons: MultiPolygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(
        polygons
            .0
            .into_iter()
            .filter(|p| p.exterior().0.len() >= 4)
            .filter(|p| p.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite()))
            .filter(|p| p.unsigned_area() > 0.0)
            .collect(),
    )
}

/// Collect geometries into the multi type matching their shape class
fn collect_typed(mut geometries: Vec<Geometry<f64>>, shape: ShapeClass) -> Geometry<f64> {
    if geometries.len() == 1 {
        return geometries.remove(0);
    }
    match shape {
        ShapeClass::Point => {
            let points: Vec<Point<f64>> = geometries
                .into_iter()
                .flat_map(|g| match g {
                    Geometry::Point(p) => vec![p],
                    Geometry::MultiPoint(mp) => mp.0,
                    _ => Vec::new(),
                })
                .collect();
            Geometry::MultiPoint(MultiPoint::new(points))
        }
        ShapeClass::Line => {
            let lines: Vec<LineString<f64>> = geometries
                .into_iter()
                .flat_map(|g| match g {
                    Geometry::Line(l) => vec![LineString::new(vec![l.start, l.end])],
                    Geometry::LineString(ls) => vec![ls],
                    Geometry::MultiLineString(mls) => mls.0,
                    _ => Vec::new(),
                })
                .collect();
            Geometry::MultiLineString(MultiLineString::new(lines))
        }
        ShapeClass::Polygon => {
            let polygons: Vec<Polygon<f64>> = geometries
                .into_iter()
                .flat_map(|g| match g {
                    Geometry::Polygon(p) => vec![p],
                    Geometry::MultiPolygon(mp) => mp.0,
                    Geometry::Rect(r) => vec![r.to_polygon()],
                    Geometry::Triangle(t) => vec![t.to_polygon()],
                    _ => Vec::new(),
                })
                .collect();
            Geometry::MultiPolygon(MultiPolygon::new(polygons))
        }
        ShapeClass::Mixed => Geometry::GeometryCollection(GeometryCollection::new_from(geometries)),
    }
}
