//! R-tree indexed record endpoints and radius queries.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::geo_utils::{haversine_km, km_to_lat_degrees, km_to_lon_degrees};
use crate::{GeoPoint, TripEnd, TripRecord};

/// A record endpoint with its index into the record slice.
#[derive(Debug, Clone, Copy)]
pub struct IndexedPoint {
    pub record_idx: usize,
    pub location: GeoPoint,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.location.longitude, self.location.latitude])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.location.longitude - point[0];
        let dy = self.location.latitude - point[1];
        dx * dx + dy * dy
    }
}

/// Spatial index over a fixed set of record endpoints.
///
/// Built once per pass, then queried for "all points within radius of a
/// zone centroid". Queries prefilter with a degree-space envelope and
/// confirm with exact great-circle distance.
#[derive(Debug)]
pub struct SpatialIndex {
    tree: RTree<IndexedPoint>,
}

impl SpatialIndex {
    /// Bulk-load the index from (record index, location) pairs.
    pub fn build(points: Vec<IndexedPoint>) -> Self {
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    /// All indexed points within `radius_km` of `center`.
    pub fn within_radius_km(&self, center: &GeoPoint, radius_km: f64) -> Vec<&IndexedPoint> {
        let dlat = km_to_lat_degrees(radius_km);
        let dlon = km_to_lon_degrees(radius_km, center.latitude);
        let envelope = AABB::from_corners(
            [center.longitude - dlon, center.latitude - dlat],
            [center.longitude + dlon, center.latitude + dlat],
        );

        self.tree
            .locate_in_envelope(&envelope)
            .filter(|p| haversine_km(center, &p.location) <= radius_km)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

/// Index the chosen endpoint of every record that has one.
///
/// Indexed entries carry the record's position in the slice, so query
/// hits map straight back to the records they came from.
pub fn index_records(records: &[TripRecord], end: TripEnd) -> SpatialIndex {
    let points: Vec<IndexedPoint> = records
        .iter()
        .enumerate()
        .filter_map(|(i, record)| {
            record.end_point(end).map(|location| IndexedPoint {
                record_idx: i,
                location,
            })
        })
        .collect();
    SpatialIndex::build(points)
}
