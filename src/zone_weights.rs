//! Zones and the zone-candidate matching pass.
//!
//! The pass loops over zones rather than points: zone counts are small,
//! so each zone queries the spatial index around its centroid and
//! scores the candidate points it reaches. A point can accumulate
//! weights from every zone whose search radius covers it.

use geo::{Contains, LineString, Point, Polygon, Rect};
use geo::{Area, BoundingRect, Centroid};
use log::warn;

use crate::activities::{Activity, ActivityRatioTable};
use crate::error::{ImputationError, Result};
use crate::geo_utils::{distance_to_ring_km, rect_dimensions_km};
use crate::imputation::ProcessedIdSet;
use crate::spatial_index::SpatialIndex;
use crate::{GeoPoint, ImputationConfig, TripRecord};

/// Raw zone input as supplied by the reference-geometry collaborator.
#[derive(Debug, Clone)]
pub struct ZoneDefinition {
    pub id: String,
    pub activity: Activity,
    pub boundary: Polygon<f64>,
}

/// A zone with its derived search geometry.
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: String,
    pub activity: Activity,
    boundary: Polygon<f64>,
    centroid: GeoPoint,
    bbox: Rect<f64>,
    /// Search radius: max bbox extent plus the walking-catchment buffer.
    pub radius_km: f64,
}

impl Zone {
    /// Validate a boundary polygon and derive the search geometry.
    ///
    /// `buffer_km` models the maximum plausible walking catchment and is
    /// added to the longest bounding-box extent.
    pub fn new(
        id: impl Into<String>,
        activity: Activity,
        boundary: Polygon<f64>,
        buffer_km: f64,
    ) -> Result<Self> {
        let id = id.into();

        if boundary.exterior().0.len() < 4 {
            return Err(ImputationError::geometry(
                id,
                "exterior ring has fewer than 4 coordinates",
            ));
        }
        if boundary.unsigned_area() == 0.0 {
            return Err(ImputationError::geometry(id, "zero-area polygon"));
        }

        let bbox = boundary
            .bounding_rect()
            .ok_or_else(|| ImputationError::geometry(&id, "no bounding rectangle"))?;
        let center = boundary
            .centroid()
            .ok_or_else(|| ImputationError::geometry(&id, "no centroid"))?;

        let (width_km, height_km) = rect_dimensions_km(&bbox);
        let radius_km = width_km.max(height_km) + buffer_km;

        Ok(Self {
            id,
            activity,
            boundary,
            centroid: GeoPoint::new(center.y(), center.x()),
            bbox,
            radius_km,
        })
    }

    pub fn centroid(&self) -> GeoPoint {
        self.centroid
    }

    pub fn bbox(&self) -> &Rect<f64> {
        &self.bbox
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.boundary
            .contains(&Point::new(point.longitude, point.latitude))
    }

    /// Distance from a point to the nearest exterior edge, in km.
    pub fn distance_to_boundary_km(&self, point: &GeoPoint) -> f64 {
        distance_to_ring_km(point, self.exterior())
    }

    fn exterior(&self) -> &LineString<f64> {
        self.boundary.exterior()
    }
}

/// Build zones from raw definitions, skipping degenerate ones.
///
/// A degenerate zone is logged and dropped; the run continues with the
/// remaining zones.
pub fn prepare_zones(definitions: Vec<ZoneDefinition>, buffer_km: f64) -> Vec<Zone> {
    let mut zones = Vec::with_capacity(definitions.len());
    for def in definitions {
        match Zone::new(def.id, def.activity, def.boundary, buffer_km) {
            Ok(zone) => zones.push(zone),
            Err(err) => warn!("skipping zone: {}", err),
        }
    }
    zones
}

/// Plausibility weight of a zone for a point at the given distance.
///
/// Interior points get a bonus (or a flat weight for transfer zones,
/// which dominate regardless of activity mix). A thin near-boundary
/// band gets a flat discount so the weight does not jump at the edge.
/// Beyond that, plausibility decays with walking distance up to the
/// catchment cutoff; farther points record no weight at all.
pub fn zone_weight(
    distance_km: f64,
    zone_activity: Activity,
    activity_ratio: f64,
    config: &ImputationConfig,
) -> Option<f64> {
    if distance_km == 0.0 {
        if zone_activity == Activity::Transfer {
            Some(config.transfer_interior_weight)
        } else {
            Some(activity_ratio * config.interior_bonus)
        }
    } else if distance_km < config.near_boundary_km {
        Some(config.near_boundary_discount * activity_ratio)
    } else if distance_km <= config.max_walk_km {
        Some(activity_ratio / (distance_km * 1000.0).powf(config.distance_decay_exponent))
    } else {
        None
    }
}

/// The zone-candidate matching pass.
///
/// For every zone, scores each indexed point within the zone's search
/// radius and stores the weight in that record's candidate map. Records
/// already imputed in a previous run are left untouched.
pub fn match_zones_to_records(
    zones: &[Zone],
    records: &mut [TripRecord],
    index: &SpatialIndex,
    ratios: &ActivityRatioTable,
    processed: &ProcessedIdSet,
    config: &ImputationConfig,
) {
    for zone in zones {
        let activity_ratio = ratios.ratio(zone.activity);
        let centroid = zone.centroid();

        for candidate in index.within_radius_km(&centroid, zone.radius_km) {
            let record = &mut records[candidate.record_idx];
            if processed.contains(&record.id) {
                continue;
            }

            let point = candidate.location;
            let distance_km = if zone.contains(&point) {
                0.0
            } else {
                zone.distance_to_boundary_km(&point)
            };

            if let Some(weight) = zone_weight(distance_km, zone.activity, activity_ratio, config) {
                record.candidate_zones.insert(zone.id.clone(), weight);
            }
        }
    }
}
