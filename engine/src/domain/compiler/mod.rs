//! Filter chain compilation into backend boolean expressions
//!
//! Compilation is a pure projection of a chain onto one target dataset: it
//! never mutates the chain, so its output can be memoized in the expression
//! cache.

pub mod expression;
pub mod literal;

use std::collections::HashSet;

use crate::data::sql::SpatialDialect;
use crate::domain::dataset::{DatasetDescriptor, FeatureKey};
use crate::domain::error::EngineError;
use crate::domain::filter::{Filter, FilterChain, FilterKind, SpatialPredicate};
use crate::domain::geometry::PreparedGeometry;

pub use literal::{EMPTY_SELECTION, dedup_literals, in_list, key_list, render_feature_key, render_key};

/// Geometry side of `BufferIntersect` filters
#[derive(Debug, Clone, Copy)]
pub enum SpatialOperand<'a> {
    /// No spatial reference; spatial filters are rejected
    None,
    /// Predicates are rendered as SQL calls against the prepared reference
    Prepared(&'a PreparedGeometry),
    /// Selection already evaluated in memory; rendered as a key list
    Selected(&'a SelectedKeys),
}

/// Keys selected in memory, one entry per distinct predicate set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectedKeys {
    entries: Vec<(Vec<SpatialPredicate>, Vec<FeatureKey>)>,
}

impl SelectedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, predicates: Vec<SpatialPredicate>, keys: Vec<FeatureKey>) {
        match self.entries.iter_mut().find(|(p, _)| *p == predicates) {
            Some(entry) => entry.1 = keys,
            None => self.entries.push((predicates, keys)),
        }
    }

    pub fn get(&self, predicates: &[SpatialPredicate]) -> Option<&[FeatureKey]> {
        self.entries
            .iter()
            .find(|(p, _)| p.as_slice() == predicates)
            .map(|(_, keys)| keys.as_slice())
    }

    pub fn contains(&self, predicates: &[SpatialPredicate]) -> bool {
        self.get(predicates).is_some()
    }

    /// Every selected key across predicate sets, first-seen order
    pub fn all_keys(&self) -> Vec<FeatureKey> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .flat_map(|(_, keys)| keys)
            .filter(|key| seen.insert(*key))
            .cloned()
            .collect()
    }
}

/// Dataset an expression is compiled for, plus the SQL dialect when the
/// dataset is reached through SQL
#[derive(Clone, Copy)]
pub struct CompileTarget<'a> {
    pub descriptor: &'a DatasetDescriptor,
    pub dialect: Option<&'a dyn SpatialDialect>,
}

impl<'a> CompileTarget<'a> {
    pub fn new(descriptor: &'a DatasetDescriptor, dialect: Option<&'a dyn SpatialDialect>) -> Self {
        Self { descriptor, dialect }
    }
}

/// Compile the enabled filters of `chain` into one boolean expression
pub fn compile(
    chain: &FilterChain,
    target: &CompileTarget<'_>,
    operand: SpatialOperand<'_>,
) -> Result<String, EngineError> {
    check_metadata(chain, target.descriptor)?;
    chain.build_expression(|filter| compile_filter(filter, target, operand))
}

fn check_metadata(chain: &FilterChain, descriptor: &DatasetDescriptor) -> Result<(), EngineError> {
    if descriptor.primary_key_field.trim().is_empty() {
        return Err(EngineError::metadata(
            &descriptor.dataset_id,
            "primary key field is not set",
        ));
    }
    if chain.has_spatial_filters() {
        if descriptor.geometry_field.trim().is_empty() {
            return Err(EngineError::metadata(
                &descriptor.dataset_id,
                "geometry field is not set",
            ));
        }
        if descriptor.srid == 0 {
            return Err(EngineError::metadata(&descriptor.dataset_id, "SRID is not set"));
        }
    }
    Ok(())
}

fn compile_filter(
    filter: &Filter,
    target: &CompileTarget<'_>,
    operand: SpatialOperand<'_>,
) -> Result<String, EngineError> {
    let descriptor = target.descriptor;
    match filter.kind {
        FilterKind::SpatialSelection => {
            let literals = filter
                .selected_ids()?
                .iter()
                .map(|raw| render_key(raw, descriptor.primary_key_type))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(in_list(&descriptor.quoted_primary_key(), &dedup_literals(literals)))
        }
        FilterKind::BufferIntersect => {
            let predicates = filter.predicates()?;
            match operand {
                SpatialOperand::Selected(selected) => {
                    let keys = selected.get(&predicates).ok_or_else(|| {
                        EngineError::invalid(format!(
                            "filter {} was not evaluated in memory",
                            filter.id
                        ))
                    })?;
                    key_list(&descriptor.quoted_primary_key(), keys, descriptor.primary_key_type)
                }
                SpatialOperand::Prepared(prepared) => {
                    let dialect = target.dialect.ok_or_else(|| {
                        EngineError::invalid(format!(
                            "dataset {} has no SQL dialect for spatial predicates",
                            descriptor.dataset_id
                        ))
                    })?;
                    let mut reference = prepared.sql_in(dialect).ok_or_else(|| {
                        EngineError::invalid("in-memory geometry cannot be referenced from SQL")
                    })?;
                    if prepared.srid != descriptor.srid {
                        reference = dialect.transform(&reference, prepared.srid, descriptor.srid);
                    }
                    let column = match prepared.relation() {
                        Some(relation) if relation != descriptor.relation() => format!(
                            "{}.{}",
                            descriptor.relation(),
                            descriptor.quoted_geometry_field()
                        ),
                        _ => descriptor.quoted_geometry_field(),
                    };
                    Ok(predicates
                        .iter()
                        .map(|p| dialect.predicate(*p, &column, &reference))
                        .collect::<Vec<_>>()
                        .join(" OR "))
                }
                SpatialOperand::None => Err(EngineError::invalid(format!(
                    "filter {} needs a source geometry",
                    filter.id
                ))),
            }
        }
        FilterKind::CustomExpression | FilterKind::AttributeExpression => {
            expression::check_syntax(&filter.payload)?;
            let foreign_reference = match operand {
                SpatialOperand::Prepared(prepared) => prepared
                    .relation()
                    .is_some_and(|relation| relation != descriptor.relation()),
                _ => false,
            };
            if foreign_reference {
                expression::qualify_fields(filter.payload.trim(), &descriptor.relation())
            } else {
                Ok(filter.payload.trim().to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sql::{DuckdbDialect, PostgisDialect};
    use crate::domain::dataset::fixtures::descriptor;
    use crate::domain::dataset::{PrimaryKeyType, ProviderKind};
    use crate::domain::filter::CombineOp;
    use crate::domain::geometry::GeometryReference;

    fn sql_reference(fragment: &str, relation: Option<&str>, srid: u32) -> PreparedGeometry {
        PreparedGeometry {
            reference: GeometryReference::Sql {
                fragment: fragment.to_string(),
                relation: relation.map(str::to_string),
            },
            srid,
            provider_kind: ProviderKind::FullSql,
            shape: None,
            buffered: true,
            fingerprint: "fp".to_string(),
            skipped: Vec::new(),
        }
    }

    #[test]
    fn test_selection_after_custom_expression() {
        let mut chain = FilterChain::new("parcels");
        chain.add(Filter::selection("[1,2,3]"));
        chain.add(Filter::custom("\"status\" = 'active'").with_priority(10));
        let desc = descriptor("parcels", ProviderKind::FullSql);
        let target = CompileTarget::new(&desc, Some(&PostgisDialect));

        let expr = compile(&chain, &target, SpatialOperand::None).unwrap();
        assert_eq!(expr, "(\"status\" = 'active') AND (\"id\" IN (1,2,3))");
    }

    #[test]
    fn test_text_and_uuid_keys() {
        let mut chain = FilterChain::new("people");
        chain.add(Filter::selection("[\"O'Brien\"]"));

        let mut desc = descriptor("people", ProviderKind::FullSql);
        desc.primary_key_type = PrimaryKeyType::Text;
        let expr = compile(&chain, &CompileTarget::new(&desc, None), SpatialOperand::None).unwrap();
        assert!(expr.contains("'O''Brien'"));

        let mut chain = FilterChain::new("people");
        chain.add(Filter::selection("7b2e1a3e-0c4d-4e5f-8a9b-1c2d3e4f5a6b"));
        desc.primary_key_type = PrimaryKeyType::Uuid;
        let expr = compile(&chain, &CompileTarget::new(&desc, None), SpatialOperand::None).unwrap();
        assert_eq!(expr, "(\"id\" IN ('7b2e1a3e-0c4d-4e5f-8a9b-1c2d3e4f5a6b'))");
    }

    #[test]
    fn test_empty_selection_matches_nothing() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::selection("[]"));
        let desc = descriptor("roads", ProviderKind::FullSql);
        let expr = compile(&chain, &CompileTarget::new(&desc, None), SpatialOperand::None).unwrap();
        assert_eq!(expr, "(1=0)");
    }

    #[test]
    fn test_buffer_intersect_predicates_or() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::buffer_intersect("intersects,within"));
        let desc = descriptor("roads", ProviderKind::FullSql);
        let prepared = sql_reference("REF", None, 3857);

        let expr = compile(
            &chain,
            &CompileTarget::new(&desc, Some(&PostgisDialect)),
            SpatialOperand::Prepared(&prepared),
        )
        .unwrap();
        assert_eq!(
            expr,
            "(ST_Intersects(\"geom\", REF) OR ST_Within(\"geom\", REF))"
        );
    }

    #[test]
    fn test_reference_transformed_to_target_srid() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::buffer_intersect("intersects"));
        let mut desc = descriptor("roads", ProviderKind::EmbeddedSql);
        desc.srid = 4326;
        let prepared = sql_reference("REF", None, 3857);

        let expr = compile(
            &chain,
            &CompileTarget::new(&desc, Some(&DuckdbDialect)),
            SpatialOperand::Prepared(&prepared),
        )
        .unwrap();
        assert!(expr.contains("ST_Transform(REF, 'EPSG:3857', 'EPSG:4326'"));
    }

    #[test]
    fn test_custom_fields_qualified_for_foreign_relation() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::buffer_intersect("intersects"));
        chain.add(Filter::custom("\"lanes\" > 2").with_combine(CombineOp::AndNot));
        let desc = descriptor("roads", ProviderKind::FullSql);
        let prepared = sql_reference("REF", Some("\"public\".\"parcels\""), 3857);

        let expr = compile(
            &chain,
            &CompileTarget::new(&desc, Some(&PostgisDialect)),
            SpatialOperand::Prepared(&prepared),
        )
        .unwrap();
        assert_eq!(
            expr,
            "(ST_Intersects(\"public\".\"roads\".\"geom\", REF)) AND NOT (\"public\".\"roads\".\"lanes\" > 2)"
        );
    }

    #[test]
    fn test_selected_keys_operand() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::buffer_intersect("intersects"));
        let desc = descriptor("roads", ProviderKind::GenericReader);
        let mut selected = SelectedKeys::new();
        selected.insert(
            vec![SpatialPredicate::Intersects],
            vec![FeatureKey::Int(4), FeatureKey::Int(9)],
        );
        let expr = compile(&chain, &CompileTarget::new(&desc, None), SpatialOperand::Selected(&selected))
            .unwrap();
        assert_eq!(expr, "(\"id\" IN (4,9))");

        let empty = SelectedKeys::new();
        assert!(compile(&chain, &CompileTarget::new(&desc, None), SpatialOperand::Selected(&empty)).is_err());
    }

    #[test]
    fn test_disabled_payload_never_compiled() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::custom("\"kind\" = 'secret-marker'").disabled());
        chain.add(Filter::custom("\"kind\" = 'road'"));
        let desc = descriptor("roads", ProviderKind::FullSql);
        let expr = compile(&chain, &CompileTarget::new(&desc, None), SpatialOperand::None).unwrap();
        assert!(!expr.contains("secret-marker"));
    }

    #[test]
    fn test_metadata_errors() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::buffer_intersect("intersects"));
        let mut desc = descriptor("roads", ProviderKind::FullSql);
        desc.geometry_field.clear();
        let err = compile(&chain, &CompileTarget::new(&desc, None), SpatialOperand::None).unwrap_err();
        assert!(matches!(err, EngineError::DatasetMetadata { .. }));

        let mut desc = descriptor("roads", ProviderKind::FullSql);
        desc.primary_key_field = " ".into();
        let err = compile(&FilterChain::new("roads"), &CompileTarget::new(&desc, None), SpatialOperand::None)
            .unwrap_err();
        assert!(matches!(err, EngineError::DatasetMetadata { .. }));
    }

    #[test]
    fn test_syntax_error_surfaces() {
        let mut chain = FilterChain::new("roads");
        chain.add(Filter::custom("\"a\" = 'open"));
        let desc = descriptor("roads", ProviderKind::FullSql);
        let err = compile(&chain, &CompileTarget::new(&desc, None), SpatialOperand::None).unwrap_err();
        assert!(matches!(err, EngineError::ExpressionSyntax(_)));
    }
}
