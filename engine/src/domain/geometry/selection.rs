//! In-memory select-by-location
//!
//! Evaluates spatial predicates between reader features and a prepared
//! reference geometry with DE-9IM matrices. Predicates keep SQL argument order:
//! the feature is the first operand, the reference the second.

use geo::dimensions::Dimensions;
use geo::relate::IntersectionMatrix;
use geo::{Geometry, HasDimensions, Relate};

use super::crs;
use crate::data::reader::SourceFeature;
use crate::domain::dataset::FeatureKey;
use crate::domain::error::EngineError;
use crate::domain::filter::SpatialPredicate;

fn pattern(matrix: &IntersectionMatrix, spec: &str) -> bool {
    matrix.matches(spec).unwrap_or(false)
}

fn evaluate(
    predicate: SpatialPredicate,
    matrix: &IntersectionMatrix,
    a: Dimensions,
    b: Dimensions,
) -> bool {
    match predicate {
        SpatialPredicate::Intersects => matrix.is_intersects(),
        SpatialPredicate::Contains => matrix.is_contains(),
        SpatialPredicate::Within => matrix.is_within(),
        SpatialPredicate::Covers => matrix.is_covers(),
        SpatialPredicate::CoveredBy => matrix.is_coveredby(),
        SpatialPredicate::Touches => {
            pattern(matrix, "FT*******")
                || pattern(matrix, "F**T*****")
                || pattern(matrix, "F***T****")
        }
        SpatialPredicate::Crosses => match (a, b) {
            (Dimensions::OneDimensional, Dimensions::OneDimensional) => {
                pattern(matrix, "0********")
            }
            (a, b) if a < b => pattern(matrix, "T*T******"),
            (a, b) if a > b => pattern(matrix, "T*****T**"),
            _ => false,
        },
        SpatialPredicate::Overlaps => match (a, b) {
            (Dimensions::OneDimensional, Dimensions::OneDimensional) => {
                pattern(matrix, "1*T***T**")
            }
            (a, b) if a == b => pattern(matrix, "T*T***T**"),
            _ => false,
        },
    }
}

/// Keys of the features matching any of `predicates` against `reference`.
///
/// The reference is reprojected into the features' CRS first. Output keeps
/// reader order.
pub fn select_by_location(
    features: &[SourceFeature],
    feature_srid: u32,
    reference: &Geometry<f64>,
    reference_srid: u32,
    predicates: &[SpatialPredicate],
) -> Result<Vec<FeatureKey>, EngineError> {
    if predicates.is_empty() {
        return Err(EngineError::syntax("no spatial predicates to evaluate"));
    }
    let reference = crs::transform(reference, reference_srid, feature_srid)?;
    let reference_dims = reference.dimensions();

    let mut keys = Vec::new();
    for feature in features {
        if feature.geometry.is_empty() {
            continue;
        }
        let matrix = feature.geometry.relate(&reference);
        let dims = feature.geometry.dimensions();
        if predicates
            .iter()
            .any(|p| evaluate(*p, &matrix, dims, reference_dims))
        {
            keys.push(feature.key.clone());
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon};

    fn square() -> Geometry<f64> {
        polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ]
        .into()
    }

    fn features() -> Vec<SourceFeature> {
        vec![
            SourceFeature::new(1, point!(x: 5.0, y: 5.0)),
            SourceFeature::new(2, point!(x: 50.0, y: 50.0)),
            SourceFeature::new(3, point!(x: 10.0, y: 5.0)),
            SourceFeature::new(4, line_string![(x: 5.0, y: 5.0), (x: 20.0, y: 5.0)]),
        ]
    }

    fn select(predicate: SpatialPredicate) -> Vec<FeatureKey> {
        select_by_location(&features(), 3857, &square(), 3857, &[predicate]).unwrap()
    }

    #[test]
    fn test_intersects() {
        assert_eq!(
            select(SpatialPredicate::Intersects),
            vec![FeatureKey::Int(1), FeatureKey::Int(3), FeatureKey::Int(4)]
        );
    }

    #[test]
    fn test_within_and_touches() {
        assert_eq!(select(SpatialPredicate::Within), vec![FeatureKey::Int(1)]);
        assert_eq!(select(SpatialPredicate::Touches), vec![FeatureKey::Int(3)]);
        assert_eq!(select(SpatialPredicate::CoveredBy), vec![FeatureKey::Int(1), FeatureKey::Int(3)]);
    }

    #[test]
    fn test_crosses_line_polygon() {
        assert_eq!(select(SpatialPredicate::Crosses), vec![FeatureKey::Int(4)]);
    }

    #[test]
    fn test_predicates_are_ored() {
        let keys = select_by_location(
            &features(),
            3857,
            &square(),
            3857,
            &[SpatialPredicate::Within, SpatialPredicate::Touches],
        )
        .unwrap();
        assert_eq!(keys, vec![FeatureKey::Int(1), FeatureKey::Int(3)]);
    }

    #[test]
    fn test_reference_reprojected() {
        let wgs84 = vec![SourceFeature::new("paris", point!(x: 2.3522, y: 48.8566))];
        let reference = crs::transform(
            &polygon![
                (x: 2.3, y: 48.8),
                (x: 2.4, y: 48.8),
                (x: 2.4, y: 48.9),
                (x: 2.3, y: 48.9),
            ]
            .into(),
            crs::WGS84,
            crs::WEB_MERCATOR,
        )
        .unwrap();
        let keys = select_by_location(
            &wgs84,
            crs::WGS84,
            &reference,
            crs::WEB_MERCATOR,
            &[SpatialPredicate::Intersects],
        )
        .unwrap();
        assert_eq!(keys, vec![FeatureKey::from("paris")]);
    }
}
