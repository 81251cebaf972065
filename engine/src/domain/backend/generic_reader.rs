//! Generic reader strategy: in-memory selection turned into a key list

use std::sync::Arc;

use geo::Geometry;
use wkt::TryFromWkt;

use super::{Compiled, MaterializationRef, StrategyJob};
use crate::domain::compiler::{self, CompileTarget, SelectedKeys, SpatialOperand};
use crate::domain::error::EngineError;
use crate::domain::filter::{FilterKind, SpatialPredicate};
use crate::domain::geometry::{GeometryReference, select_by_location};

fn reference_geometry(job: &StrategyJob<'_>) -> Result<(Arc<Geometry<f64>>, u32), EngineError> {
    let geometry = job.geometry.ok_or_else(|| {
        EngineError::invalid(format!(
            "spatial filters on {} need a prepared geometry",
            job.handle.descriptor.dataset_id
        ))
    })?;
    let reference = match &geometry.reference {
        GeometryReference::Memory(g) => Arc::clone(g),
        GeometryReference::Wkt(text) => Arc::new(
            Geometry::<f64>::try_from_wkt_str(text)
                .map_err(|e| EngineError::geometry(format!("invalid reference WKT: {}", e)))?,
        ),
        GeometryReference::Sql { .. } => {
            return Err(EngineError::geometry(
                "SQL geometry reference cannot be evaluated in memory",
            ));
        }
    };
    Ok((reference, geometry.srid))
}

pub(super) async fn build_expression(job: &StrategyJob<'_>) -> Result<Compiled, EngineError> {
    let desc = &job.handle.descriptor;
    let target = CompileTarget::new(desc, None);

    if !job.chain.has_spatial_filters() {
        return Ok(Compiled::sql(compiler::compile(job.chain, &target, SpatialOperand::None)?));
    }

    let reader = job.handle.reader.as_ref().ok_or_else(|| {
        EngineError::metadata(&desc.dataset_id, "dataset offers no feature reader")
    })?;
    let (reference, reference_srid) = reference_geometry(job)?;

    let mut predicate_sets: Vec<Vec<SpatialPredicate>> = Vec::new();
    for filter in job.chain.ordered() {
        if filter.kind == FilterKind::BufferIntersect {
            let predicates = filter.predicates()?;
            if !predicate_sets.contains(&predicates) {
                predicate_sets.push(predicates);
            }
        }
    }

    let features = reader.read_features(None).await?;
    let feature_count = features.len();
    let feature_srid = desc.srid;
    let selected = tokio::task::spawn_blocking(move || {
        let mut selected = SelectedKeys::new();
        for predicates in predicate_sets {
            let keys = select_by_location(
                &features,
                feature_srid,
                &reference,
                reference_srid,
                &predicates,
            )?;
            selected.insert(predicates, keys);
        }
        Ok::<_, EngineError>(selected)
    })
    .await
    .map_err(|e| EngineError::materialization(&desc.dataset_id, format!("selection task failed: {}", e)))??;

    let keys = selected.all_keys();
    tracing::debug!(
        dataset = %desc.dataset_id,
        features = feature_count,
        selected = keys.len(),
        "In-memory selection complete"
    );

    let expression = compiler::compile(job.chain, &target, SpatialOperand::Selected(&selected))?;
    Ok(Compiled {
        expression,
        selected: Some(keys),
    })
}

pub(super) fn materialize(compiled: &Compiled) -> MaterializationRef {
    MaterializationRef::KeySet {
        keys: compiled.selected.clone().unwrap_or_default(),
        subset: compiled.expression.clone(),
    }
}

#[cfg(test)]
mod tests {
    use geo::{point, polygon};

    use super::super::BackendStrategy;
    use super::*;
    use crate::data::reader::{MemoryReader, SourceFeature};
    use crate::data::subset::MemorySubset;
    use crate::domain::dataset::{FeatureKey, ProviderKind};
    use crate::domain::filter::{Filter, FilterChain};
    use crate::domain::geometry::{PreparedGeometry, ShapeClass};

    fn prepared() -> PreparedGeometry {
        let square: Geometry<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 0.0, y: 100.0),
        ]
        .into();
        PreparedGeometry {
            reference: GeometryReference::Memory(Arc::new(square)),
            srid: 3857,
            provider_kind: ProviderKind::GenericReader,
            shape: Some(ShapeClass::Polygon),
            buffered: true,
            fingerprint: "fp".into(),
            skipped: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_selection_becomes_key_list() {
        let subset = Arc::new(MemorySubset::default());
        let mut handle =
            super::super::tests::handle(ProviderKind::GenericReader, Arc::clone(&subset));
        handle.reader = Some(Arc::new(MemoryReader::new(vec![
            SourceFeature::new(10, point!(x: 50.0, y: 50.0)),
            SourceFeature::new(11, point!(x: 500.0, y: 50.0)),
            SourceFeature::new(12, point!(x: 99.0, y: 1.0)),
        ])));
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::buffer_intersect("intersects"));
        let geometry = prepared();
        let job = StrategyJob {
            handle: &handle,
            chain: &chain,
            geometry: Some(&geometry),
            scratch_schema: "geofilter",
        };

        let strategy = BackendStrategy::GenericReader;
        let compiled = strategy.build_expression(&job).await.unwrap();
        assert_eq!(compiled.expression, "(\"id\" IN (10,12))");
        let reference = strategy.materialize(&job, &compiled).await.unwrap();
        assert!(reference.artifact().is_none());
        let MaterializationRef::KeySet { keys, .. } = &reference else {
            panic!("expected key set");
        };
        assert_eq!(keys, &vec![FeatureKey::Int(10), FeatureKey::Int(12)]);
        strategy.apply(&reference, &handle).await.unwrap();
        assert_eq!(subset.applied(), vec!["(\"id\" IN (10,12))".to_string()]);
    }

    #[tokio::test]
    async fn test_no_match_selects_nothing() {
        let subset = Arc::new(MemorySubset::default());
        let mut handle = super::super::tests::handle(ProviderKind::GenericReader, subset);
        handle.reader = Some(Arc::new(MemoryReader::new(vec![SourceFeature::new(
            1,
            point!(x: 500.0, y: 500.0),
        )])));
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::buffer_intersect("within"));
        let geometry = prepared();
        let job = StrategyJob {
            handle: &handle,
            chain: &chain,
            geometry: Some(&geometry),
            scratch_schema: "geofilter",
        };
        let compiled = BackendStrategy::GenericReader.build_expression(&job).await.unwrap();
        assert_eq!(compiled.expression, "(1=0)");
    }

    #[tokio::test]
    async fn test_sql_reference_rejected() {
        let subset = Arc::new(MemorySubset::default());
        let mut handle = super::super::tests::handle(ProviderKind::GenericReader, subset);
        handle.reader = Some(Arc::new(MemoryReader::new(Vec::new())));
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::buffer_intersect("intersects"));
        let mut geometry = prepared();
        geometry.reference = GeometryReference::Sql {
            fragment: "X".into(),
            relation: None,
        };
        let job = StrategyJob {
            handle: &handle,
            chain: &chain,
            geometry: Some(&geometry),
            scratch_schema: "geofilter",
        };
        let err = BackendStrategy::GenericReader.build_expression(&job).await.unwrap_err();
        assert!(matches!(err, EngineError::GeometryPreparation(_)));
    }
}
