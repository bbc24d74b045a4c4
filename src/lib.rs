//! # OD Imputer
//!
//! Coordinate imputation for anonymized transit origin-destination
//! records.
//!
//! Smart-card fare data protects rider privacy by coarsening each
//! trip's position to a broad region. This library restores spatially
//! realistic coordinates for demand modelling: each record is
//! statistically assigned to a plausible zone or station, and a
//! concrete point consistent with that assignment is drawn.
//!
//! This library provides:
//! - Zone-weighted probabilistic imputation: spatial indexing,
//!   distance-decay weighting and weighted random sampling, with
//!   idempotent progress tracking across runs
//! - Nearest-facility assignment with ratio-driven conditional
//!   reassignment between facility types
//! - Activity-ratio estimation from weighted reference samples
//!
//! Storage connectivity, result caching on disk, logger setup and
//! geometry file loading stay with the host; the crate talks to them
//! through the [`RecordStore`] trait, the [`QueryCache`] and plain
//! parsed inputs.
//!
//! ## Quick Start
//!
//! ```rust
//! use od_imputer::{zone_weight, Activity, ImputationConfig};
//!
//! let config = ImputationConfig::default();
//!
//! // A point 500 m outside a shopping zone: plausibility decays with
//! // walking distance.
//! let weight = zone_weight(0.5, Activity::Shopping, 0.25, &config);
//! assert!(weight.is_some());
//!
//! // Beyond a ten-minute walk the zone is no longer a candidate.
//! assert_eq!(zone_weight(0.9, Activity::Shopping, 0.25, &config), None);
//! ```
//!
//! Every stochastic operation takes an injected `rand::Rng`, so a
//! seeded `StdRng` replays a whole run deterministically.

use std::collections::HashMap;

use geo::Polygon;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{ImputationError, Result};

// Geographic utilities (distances, conversions)
pub mod geo_utils;

// Read-through cache for materialized query results
pub mod cache;
pub use cache::QueryCache;

// Spatial index over record endpoints
pub mod spatial_index;
pub use spatial_index::{index_records, IndexedPoint, SpatialIndex};

// Trip-purpose categories and activity-ratio estimation
pub mod activities;
pub use activities::{weighted_count, Activity, ActivityRatioTable, PurposeCode};

// Weighted random sampling
pub mod sampler;
pub use sampler::sample_weighted;

// Zones and the zone-candidate matching pass
pub mod zone_weights;
pub use zone_weights::{
    match_zones_to_records, prepare_zones, zone_weight, Zone, ZoneDefinition,
};

// The imputation pass, progress tracking and the full pipeline
pub mod imputation;
pub use imputation::{
    impute_records, run_imputation, sample_point_in_zone, ImputationSummary, PipelineInputs,
    ProcessedIdSet,
};

// Nearest-facility assignment and conditional reassignment
pub mod facilities;
pub use facilities::{
    aggregate_ratios, assignment_counts, conditional_reassign, nearest_facility, Facility,
    MixingRatio,
};

// ============================================================================
// Core Types
// ============================================================================

/// A geographic coordinate with latitude and longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Which endpoint of a trip a pass reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripEnd {
    Origin,
    Destination,
}

impl TripEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripEnd::Origin => "origin",
            TripEnd::Destination => "destination",
        }
    }
}

/// One trip record as loaded from the record store.
///
/// The candidate map is transient working state: empty after load,
/// filled by the matching pass, consumed once by the imputation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripRecord {
    pub id: String,
    pub origin: Option<GeoPoint>,
    pub destination: Option<GeoPoint>,
    /// Population weight this sampled record represents
    pub expansion_factor: f64,
    pub purpose: Option<PurposeCode>,
    /// Candidate zone weights accumulated by the matching pass
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub candidate_zones: HashMap<String, f64>,
    /// Imputed coordinate, set by a successful imputation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imputed: Option<GeoPoint>,
}

impl TripRecord {
    pub fn new(id: impl Into<String>, expansion_factor: f64) -> Self {
        Self {
            id: id.into(),
            origin: None,
            destination: None,
            expansion_factor,
            purpose: None,
            candidate_zones: HashMap::new(),
            imputed: None,
        }
    }

    /// The coordinate of the chosen trip end, if present.
    pub fn end_point(&self, end: TripEnd) -> Option<GeoPoint> {
        match end {
            TripEnd::Origin => self.origin,
            TripEnd::Destination => self.destination,
        }
    }

    /// Replace the coordinate of the chosen trip end.
    pub fn set_end_point(&mut self, end: TripEnd, point: GeoPoint) {
        match end {
            TripEnd::Origin => self.origin = Some(point),
            TripEnd::Destination => self.destination = Some(point),
        }
    }
}

/// One element of the batched flush back to the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub id: String,
    pub end: TripEnd,
    pub location: GeoPoint,
}

/// Query descriptor the host maps onto its own storage.
///
/// The `name` doubles as the read-through cache key, so two criteria
/// with the same name are the same query.
#[derive(Debug, Clone)]
pub struct FilterCriteria {
    pub name: String,
    /// Restrict to records whose chosen end intersects `region`
    pub end: Option<TripEnd>,
    pub region: Option<Polygon<f64>>,
}

impl FilterCriteria {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            end: None,
            region: None,
        }
    }

    pub fn with_end(mut self, end: TripEnd) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_region(mut self, region: Polygon<f64>) -> Self {
        self.region = Some(region);
        self
    }
}

/// External record storage.
///
/// Both calls are synchronous batch boundaries. Failures are fatal for
/// the run and are not retried here.
pub trait RecordStore {
    fn fetch(&mut self, criteria: &FilterCriteria) -> Result<Vec<TripRecord>>;

    /// Apply a batch of coordinate updates, returning the row count.
    fn update(&mut self, batch: &[RecordUpdate]) -> Result<usize>;
}

/// Configuration for zone weighting and point generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImputationConfig {
    /// Walking-catchment buffer added to each zone's search radius.
    /// Default: 0.833 km (10 minutes at walking speed, bird distance)
    pub zone_buffer_km: f64,

    /// Outer edge of the flat-discount band hugging the zone boundary.
    /// Default: 0.05 km
    pub near_boundary_km: f64,

    /// Maximum distance at which a zone is still a candidate.
    /// Default: 0.833 km
    pub max_walk_km: f64,

    /// Multiplier on the activity ratio for points inside the zone.
    /// Default: 1.1
    pub interior_bonus: f64,

    /// Multiplier on the activity ratio in the near-boundary band.
    /// Default: 0.9
    pub near_boundary_discount: f64,

    /// Flat weight for points inside a transfer zone.
    /// Default: 10.0
    pub transfer_interior_weight: f64,

    /// Exponent of the distance decay, applied to the distance in meters.
    /// Default: 0.35
    pub distance_decay_exponent: f64,

    /// Rejection-sampling budget before falling back to the centroid.
    /// Default: 1000
    pub max_rejection_attempts: u32,
}

impl Default for ImputationConfig {
    fn default() -> Self {
        Self {
            zone_buffer_km: 0.833,
            near_boundary_km: 0.05,
            max_walk_km: 0.833,
            interior_bonus: 1.1,
            near_boundary_discount: 0.9,
            transfer_interior_weight: 10.0,
            distance_decay_exponent: 0.35,
            max_rejection_attempts: 1000,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(45.5, -73.5).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_trip_end_accessors() {
        let mut record = TripRecord::new("r", 1.0);
        assert!(record.end_point(TripEnd::Origin).is_none());

        record.set_end_point(TripEnd::Origin, GeoPoint::new(45.5, -73.5));
        record.set_end_point(TripEnd::Destination, GeoPoint::new(45.6, -73.4));
        assert_eq!(
            record.end_point(TripEnd::Origin),
            Some(GeoPoint::new(45.5, -73.5))
        );
        assert_eq!(
            record.end_point(TripEnd::Destination),
            Some(GeoPoint::new(45.6, -73.4))
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = ImputationConfig::default();
        assert_eq!(config.zone_buffer_km, 0.833);
        assert_eq!(config.max_walk_km, 0.833);
        assert_eq!(config.near_boundary_km, 0.05);
        assert_eq!(config.max_rejection_attempts, 1000);
    }

    // ------------------------------------------------------------------
    // Full pipeline against an in-memory store
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MemoryStore {
        datasets: HashMap<String, Vec<TripRecord>>,
        fetch_calls: usize,
        flushed: Vec<Vec<RecordUpdate>>,
    }

    impl RecordStore for MemoryStore {
        fn fetch(&mut self, criteria: &FilterCriteria) -> Result<Vec<TripRecord>> {
            self.fetch_calls += 1;
            self.datasets
                .get(&criteria.name)
                .cloned()
                .ok_or_else(|| ImputationError::store(format!("unknown query {}", criteria.name)))
        }

        fn update(&mut self, batch: &[RecordUpdate]) -> Result<usize> {
            self.flushed.push(batch.to_vec());
            Ok(batch.len())
        }
    }

    fn reference_sample() -> Vec<TripRecord> {
        let mut records = Vec::new();
        for (i, (purpose, factor)) in [
            (PurposeCode::Home, 15.0),
            (PurposeCode::Home, 10.0),
            (PurposeCode::Shopping, 5.0),
        ]
        .into_iter()
        .enumerate()
        {
            let mut record = TripRecord::new(format!("ref-{}", i), factor);
            record.purpose = Some(purpose);
            records.push(record);
        }
        records
    }

    fn smart_card_targets() -> Vec<TripRecord> {
        let mut a = TripRecord::new("sc-1", 1.0 / 17.0);
        a.origin = Some(GeoPoint::new(45.5, -73.5));
        let mut b = TripRecord::new("sc-2", 1.0 / 17.0);
        b.origin = Some(GeoPoint::new(45.501, -73.499));
        vec![a, b]
    }

    fn home_zone_definition() -> ZoneDefinition {
        ZoneDefinition {
            id: "Z1".to_string(),
            activity: Activity::Home,
            boundary: polygon![
                (x: -73.505, y: 45.495),
                (x: -73.495, y: 45.495),
                (x: -73.495, y: 45.505),
                (x: -73.505, y: 45.505),
                (x: -73.505, y: 45.495),
            ],
        }
    }

    #[test]
    fn test_run_imputation_end_to_end() {
        let mut store = MemoryStore::default();
        store
            .datasets
            .insert("reference".to_string(), reference_sample());
        store
            .datasets
            .insert("targets".to_string(), smart_card_targets());

        let inputs = PipelineInputs {
            reference_criteria: FilterCriteria::named("reference"),
            target_criteria: FilterCriteria::named("targets").with_end(TripEnd::Origin),
            end: TripEnd::Origin,
            zones: vec![home_zone_definition()],
        };

        let mut cache = QueryCache::new();
        let mut processed = ProcessedIdSet::new();
        let config = ImputationConfig::default();
        let mut rng = StdRng::seed_from_u64(404);

        let summary = run_imputation(
            &mut store,
            &mut cache,
            &inputs,
            &mut processed,
            &config,
            &mut rng,
        )
        .unwrap();

        assert_eq!(summary.resolved, 2);
        assert_eq!(summary.unresolved, 0);
        assert_eq!(store.flushed.len(), 1);
        assert_eq!(store.flushed[0].len(), 2);
        assert_eq!(processed.len(), 2);

        // Both fetches hit the store once, then live in the cache
        assert_eq!(store.fetch_calls, 2);
        assert!(cache.contains("reference"));
        assert!(cache.contains("targets"));

        // Second run: same processed set, nothing new to impute, no flush
        let summary = run_imputation(
            &mut store,
            &mut cache,
            &inputs,
            &mut processed,
            &config,
            &mut rng,
        )
        .unwrap();
        assert_eq!(summary.resolved, 0);
        assert_eq!(store.flushed.len(), 1);
        assert_eq!(store.fetch_calls, 2);
    }

    #[test]
    fn test_run_imputation_fails_without_zones() {
        let mut store = MemoryStore::default();
        store
            .datasets
            .insert("reference".to_string(), reference_sample());
        store
            .datasets
            .insert("targets".to_string(), smart_card_targets());

        let inputs = PipelineInputs {
            reference_criteria: FilterCriteria::named("reference"),
            target_criteria: FilterCriteria::named("targets"),
            end: TripEnd::Origin,
            zones: Vec::new(),
        };

        let mut cache = QueryCache::new();
        let mut processed = ProcessedIdSet::new();
        let mut rng = StdRng::seed_from_u64(404);

        let result = run_imputation(
            &mut store,
            &mut cache,
            &inputs,
            &mut processed,
            &ImputationConfig::default(),
            &mut rng,
        );
        assert!(matches!(result, Err(ImputationError::Config { .. })));
    }

    #[test]
    fn test_store_failure_aborts_run() {
        let mut store = MemoryStore::default();
        // No datasets registered: the first fetch fails

        let inputs = PipelineInputs {
            reference_criteria: FilterCriteria::named("missing"),
            target_criteria: FilterCriteria::named("targets"),
            end: TripEnd::Origin,
            zones: vec![home_zone_definition()],
        };

        let mut cache = QueryCache::new();
        let mut processed = ProcessedIdSet::new();
        let mut rng = StdRng::seed_from_u64(404);

        let result = run_imputation(
            &mut store,
            &mut cache,
            &inputs,
            &mut processed,
            &ImputationConfig::default(),
            &mut rng,
        );
        assert!(matches!(result, Err(ImputationError::Store { .. })));
        assert!(store.flushed.is_empty());
        assert!(processed.is_empty());
    }
}
