/// Geodesic helpers over `GeoPoint`.
///
/// Distances are computed on the WGS84 ellipsoid (Karney's algorithm via the
/// `geo` crate), matching what PostGIS returns for `geography` casts.

use geo::algorithm::line_measures::metric_spaces::Geodesic;
use geo::{Contains, Distance, LineString, Point, Polygon};

use crate::model::GeoPoint;

fn to_point(p: GeoPoint) -> Point<f64> {
    Point::new(p.lon, p.lat)
}

/// Great-circle (geodesic) distance between two points, in kilometres.
pub fn geodesic_distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    Geodesic::distance(to_point(a), to_point(b)) / 1000.0
}

/// Returns `true` if `point` lies inside the polygon described by `ring`.
///
/// The ring does not need to be explicitly closed. Rings with fewer than
/// three vertices contain nothing.
pub fn ring_contains(ring: &[GeoPoint], point: GeoPoint) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let exterior: LineString<f64> = ring.iter().map(|p| (p.lon, p.lat)).collect::<Vec<_>>().into();
    let polygon = Polygon::new(exterior, vec![]);
    polygon.contains(&to_point(point))
}

/// An axis-aligned lon/lat box, used for dataset subsets and export filters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lon >= self.min_lon && p.lon <= self.max_lon && p.lat >= self.min_lat && p.lat <= self.max_lat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_zero_for_same_point() {
        let p = GeoPoint::new(-0.48, 38.34);
        assert!(geodesic_distance_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn test_one_degree_of_latitude_is_about_111_km() {
        let a = GeoPoint::new(0.0, 38.0);
        let b = GeoPoint::new(0.0, 39.0);
        let d = geodesic_distance_km(a, b);
        assert!((d - 111.0).abs() < 0.5, "got {} km", d);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = GeoPoint::new(-0.48, 38.34);
        let b = GeoPoint::new(0.12, 38.9);
        assert!((geodesic_distance_km(a, b) - geodesic_distance_km(b, a)).abs() < 1e-9);
    }

    #[test]
    fn test_ring_contains_inside_and_outside() {
        let ring = vec![
            GeoPoint::new(-0.5, 38.0),
            GeoPoint::new(-0.4, 38.0),
            GeoPoint::new(-0.4, 38.1),
            GeoPoint::new(-0.5, 38.1),
        ];
        assert!(ring_contains(&ring, GeoPoint::new(-0.45, 38.05)));
        assert!(!ring_contains(&ring, GeoPoint::new(-0.3, 38.05)));
        assert!(!ring_contains(&ring[..2], GeoPoint::new(-0.45, 38.0)));
    }

    #[test]
    fn test_bounding_box_is_inclusive() {
        let bbox = BoundingBox { min_lon: -1.5, max_lon: 0.7, min_lat: 37.5, max_lat: 40.5 };
        assert!(bbox.contains(GeoPoint::new(-1.5, 37.5)));
        assert!(bbox.contains(GeoPoint::new(0.0, 39.0)));
        assert!(!bbox.contains(GeoPoint::new(0.71, 39.0)));
    }
}
