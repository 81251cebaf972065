//! Coordinate reference system helpers (EPSG codes)

use geo::{Geometry, MapCoords};

use crate::domain::error::EngineError;

pub const WGS84: u32 = 4326;
pub const WEB_MERCATOR: u32 = 3857;

const EARTH_RADIUS_M: f64 = 6_378_137.0;
/// Latitude bound of the Web Mercator projection
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Whether an EPSG code names a projected CRS measured in metres
pub fn is_metric(srid: u32) -> bool {
    matches!(
        srid,
        3857 | 3395 | 3035 | 2154 | 27700 | 28992 | 31370 | 3067 | 5070 | 2056
            | 25828..=25838
            | 32601..=32660
            | 32701..=32760
    )
}

/// Pick the CRS buffer distances are measured in.
///
/// An explicit metric code wins; otherwise a metric source CRS is kept, and a
/// geographic WGS84 source is projected to Web Mercator.
pub fn resolve_metric_srid(source_srid: u32, explicit: Option<u32>) -> Result<u32, EngineError> {
    if let Some(srid) = explicit {
        if is_metric(srid) {
            return Ok(srid);
        }
        return Err(EngineError::geometry(format!(
            "configured metric CRS EPSG:{} is not a known metric system",
            srid
        )));
    }
    if is_metric(source_srid) {
        return Ok(source_srid);
    }
    if source_srid == WGS84 {
        return Ok(WEB_MERCATOR);
    }
    Err(EngineError::geometry(format!(
        "no metric CRS resolvable for source EPSG:{}",
        source_srid
    )))
}

/// Whether an in-memory transform between the two codes is available
pub fn can_transform(from: u32, to: u32) -> bool {
    from == to || matches!((from, to), (WGS84, WEB_MERCATOR) | (WEB_MERCATOR, WGS84))
}

/// Reproject a geometry in memory
pub fn transform(geometry: &Geometry<f64>, from: u32, to: u32) -> Result<Geometry<f64>, EngineError> {
    match (from, to) {
        (a, b) if a == b => Ok(geometry.clone()),
        (WGS84, WEB_MERCATOR) => Ok(geometry.map_coords(|c| {
            let lat = c.y.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
            geo::coord! {
                x: c.x.to_radians() * EARTH_RADIUS_M,
                y: (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS_M,
            }
        })),
        (WEB_MERCATOR, WGS84) => Ok(geometry.map_coords(|c| geo::coord! {
            x: (c.x / EARTH_RADIUS_M).to_degrees(),
            y: (2.0 * (c.y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees(),
        })),
        _ => Err(EngineError::geometry(format!(
            "no in-memory transform from EPSG:{} to EPSG:{}",
            from, to
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Point, point};

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_is_metric() {
        assert!(is_metric(3857));
        assert!(is_metric(32633));
        assert!(is_metric(32733));
        assert!(is_metric(2154));
        assert!(!is_metric(4326));
        assert!(!is_metric(32661));
    }

    #[test]
    fn test_resolve_metric() {
        assert_eq!(resolve_metric_srid(4326, None).unwrap(), 3857);
        assert_eq!(resolve_metric_srid(2154, None).unwrap(), 2154);
        assert_eq!(resolve_metric_srid(4326, Some(32631)).unwrap(), 32631);
        assert!(resolve_metric_srid(4269, None).is_err());
        assert!(resolve_metric_srid(3857, Some(4326)).is_err());
    }

    #[test]
    fn test_transform_roundtrip() {
        let p: Geometry<f64> = point!(x: 2.3522, y: 48.8566).into();
        let projected = transform(&p, WGS84, WEB_MERCATOR).unwrap();
        let Geometry::Point(mp) = projected.clone() else {
            panic!("expected point");
        };
        assert!(approx(mp.x(), 261_845.7, 1.0));
        assert!(approx(mp.y(), 6_250_564.3, 1.0));

        let back = transform(&projected, WEB_MERCATOR, WGS84).unwrap();
        let Geometry::Point(bp) = back else {
            panic!("expected point");
        };
        let original = Point::new(2.3522, 48.8566);
        assert!(approx(bp.x(), original.x(), 1e-9));
        assert!(approx(bp.y(), original.y(), 1e-9));
    }

    #[test]
    fn test_transform_unsupported() {
        let p: Geometry<f64> = point!(x: 0.0, y: 0.0).into();
        assert!(transform(&p, 2154, 4326).is_err());
        assert!(can_transform(2154, 2154));
        assert!(!can_transform(2154, 4326));
    }
}
