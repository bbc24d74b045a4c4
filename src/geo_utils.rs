//! Geographic utilities: great-circle distances, point-to-boundary
//! distances and degree/kilometre conversions.

use geo::{Coord, LineString, Rect};

use crate::GeoPoint;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const KM_PER_DEGREE_LAT: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Degrees of latitude spanned by `km` kilometres.
pub fn km_to_lat_degrees(km: f64) -> f64 {
    km / KM_PER_DEGREE_LAT
}

/// Degrees of longitude spanned by `km` kilometres at the given latitude.
///
/// Falls back to the latitude span near the poles, where a longitude
/// degree degenerates to zero width.
pub fn km_to_lon_degrees(km: f64, at_latitude: f64) -> f64 {
    let cos_lat = at_latitude.to_radians().cos();
    if cos_lat < 1e-6 {
        return km_to_lat_degrees(km);
    }
    km / (KM_PER_DEGREE_LAT * cos_lat)
}

/// Width and height of a bounding rectangle in kilometres.
///
/// Width is measured along the northern edge, height along the western
/// edge, so an elongated zone reports its longest great-circle extent.
pub fn rect_dimensions_km(rect: &Rect<f64>) -> (f64, f64) {
    let nw = GeoPoint::new(rect.max().y, rect.min().x);
    let ne = GeoPoint::new(rect.max().y, rect.max().x);
    let sw = GeoPoint::new(rect.min().y, rect.min().x);
    (haversine_km(&nw, &ne), haversine_km(&nw, &sw))
}

/// Distance in kilometres from a point to the nearest edge of a ring.
///
/// Each segment is projected onto a local equirectangular plane centred
/// on the query point; the nearest point on the segment is then measured
/// with the haversine formula. Accurate at walking-catchment scales.
pub fn distance_to_ring_km(point: &GeoPoint, ring: &LineString<f64>) -> f64 {
    let cos_lat = point.latitude.to_radians().cos();
    let mut best = f64::INFINITY;

    for segment in ring.0.windows(2) {
        let nearest = nearest_point_on_segment(point, &segment[0], &segment[1], cos_lat);
        let d = haversine_km(point, &nearest);
        if d < best {
            best = d;
        }
    }

    best
}

/// Nearest point on a single segment, in the local flat projection.
///
/// Coordinates are `geo` convention: x = longitude, y = latitude.
fn nearest_point_on_segment(point: &GeoPoint, a: &Coord<f64>, b: &Coord<f64>, cos_lat: f64) -> GeoPoint {
    // Local plane: x scaled by cos(latitude) so both axes are in
    // comparable units before projecting.
    let px = (point.longitude - a.x) * cos_lat;
    let py = point.latitude - a.y;
    let sx = (b.x - a.x) * cos_lat;
    let sy = b.y - a.y;

    let seg_len2 = sx * sx + sy * sy;
    if seg_len2 == 0.0 {
        return GeoPoint::new(a.y, a.x);
    }

    let t = ((px * sx + py * sy) / seg_len2).clamp(0.0, 1.0);
    GeoPoint::new(a.y + t * sy, a.x + t * (b.x - a.x))
}
