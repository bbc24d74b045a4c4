//! The per-record imputation pass and its progress tracking.
//!
//! Matching (zone_weights) fills each record's candidate map; this
//! module consumes those maps: sample a zone, draw a concrete point
//! inside it, queue a store update, and mark the record processed so a
//! later run never imputes it again.

use std::collections::{HashMap, HashSet};

use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cache::QueryCache;
use crate::error::{ImputationError, Result};
use crate::geo_utils::haversine_km;
use crate::sampler::sample_weighted;
use crate::spatial_index::index_records;
use crate::zone_weights::{match_zones_to_records, prepare_zones, Zone, ZoneDefinition};
use crate::{
    ActivityRatioTable, FilterCriteria, GeoPoint, ImputationConfig, RecordStore, RecordUpdate,
    TripEnd, TripRecord,
};

/// Persistent set of already-imputed record ids.
///
/// Consulted before and updated after processing; guarantees at-most-once
/// imputation across runs. The host persists it (serde) only after a
/// successful flush, so a crashed run leaves just the prior completed
/// runs on record.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProcessedIdSet {
    ids: HashSet<String>,
}

impl ProcessedIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Mark an id as imputed. Returns false if it was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for ProcessedIdSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Terminal summary of one imputation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImputationSummary {
    /// Records that received an imputed coordinate
    pub resolved: usize,
    /// Records with no candidate zone (eligible for a future run)
    pub unresolved: usize,
    /// Resolved records that fell back to the zone centroid
    pub centroid_fallbacks: usize,
    /// Mean distance in meters between original and imputed coordinates
    pub mean_displacement_m: Option<f64>,
}

/// Draw a uniform random point inside a zone by rejection sampling.
///
/// Candidates are drawn in the zone's bounding box until one passes the
/// containment test, up to `max_rejection_attempts`. A zone whose
/// polygon fills a sliver of its bounding box can exhaust the budget;
/// the centroid is the documented fallback. Returns the point and
/// whether the fallback was taken.
pub fn sample_point_in_zone<R: Rng>(
    zone: &Zone,
    config: &ImputationConfig,
    rng: &mut R,
) -> (GeoPoint, bool) {
    let bbox = zone.bbox();
    let (min, max) = (bbox.min(), bbox.max());

    for _ in 0..config.max_rejection_attempts {
        let candidate = GeoPoint::new(rng.gen_range(min.y..=max.y), rng.gen_range(min.x..=max.x));
        if zone.contains(&candidate) {
            return (candidate, false);
        }
    }

    warn!(
        "rejection sampling exhausted {} attempts in zone '{}', using centroid",
        config.max_rejection_attempts, zone.id
    );
    (zone.centroid(), true)
}

/// The sampling/imputation pass over all records.
///
/// Every unprocessed record with a non-empty candidate map is assigned a
/// zone and a concrete coordinate; the update batch and summary are
/// returned, and `processed` is updated in memory. Records with an empty
/// candidate map are counted as unresolved and stay out of `processed`,
/// so a future run with updated reference data can retry them.
pub fn impute_records<R: Rng>(
    records: &mut [TripRecord],
    end: TripEnd,
    zones: &[Zone],
    processed: &mut ProcessedIdSet,
    config: &ImputationConfig,
    rng: &mut R,
) -> Result<(Vec<RecordUpdate>, ImputationSummary)> {
    let zones_by_id: HashMap<&str, &Zone> = zones.iter().map(|z| (z.id.as_str(), z)).collect();

    let mut batch = Vec::new();
    let mut unresolved = 0usize;
    let mut fallbacks = 0usize;
    let mut displacement_sum_m = 0.0f64;
    let mut displacement_count = 0usize;

    for record in records.iter_mut() {
        if processed.contains(&record.id) {
            continue;
        }
        if record.candidate_zones.is_empty() {
            warn!("no suitable zone for record id {}", record.id);
            unresolved += 1;
            continue;
        }

        let zone_id = sample_weighted(&record.candidate_zones, rng)?.clone();
        let zone = zones_by_id.get(zone_id.as_str()).ok_or_else(|| {
            ImputationError::distribution(format!(
                "candidate map of record {} references unknown zone {}",
                record.id, zone_id
            ))
        })?;

        let (point, fell_back) = sample_point_in_zone(zone, config, rng);
        if fell_back {
            fallbacks += 1;
        }

        if let Some(original) = record.end_point(end) {
            displacement_sum_m += haversine_km(&original, &point) * 1000.0;
            displacement_count += 1;
        }

        record.imputed = Some(point);
        processed.insert(record.id.clone());
        batch.push(RecordUpdate {
            id: record.id.clone(),
            end,
            location: point,
        });
    }

    let summary = ImputationSummary {
        resolved: batch.len(),
        unresolved,
        centroid_fallbacks: fallbacks,
        mean_displacement_m: if displacement_count > 0 {
            Some(displacement_sum_m / displacement_count as f64)
        } else {
            None
        },
    };

    Ok((batch, summary))
}

/// Inputs for one full imputation run over one trip end.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    /// Query for the weighted reference sample (purpose ratios)
    pub reference_criteria: FilterCriteria,
    /// Query for the records to impute
    pub target_criteria: FilterCriteria,
    /// Which endpoint of each target record is being imputed
    pub end: TripEnd,
    /// Raw zone geometry from the reference-geometry collaborator
    pub zones: Vec<ZoneDefinition>,
}

/// Run the full pipeline: fetch, build ratios, index, match, impute,
/// flush once.
///
/// Fetches go through the read-through `cache`, so re-running with the
/// same query names costs nothing at the store. The update batch is
/// flushed in a single `RecordStore::update` call; a store failure
/// aborts before any flush side effects and the caller must not persist
/// `processed` in that case.
pub fn run_imputation<S, R>(
    store: &mut S,
    cache: &mut QueryCache<Vec<TripRecord>>,
    inputs: &PipelineInputs,
    processed: &mut ProcessedIdSet,
    config: &ImputationConfig,
    rng: &mut R,
) -> Result<ImputationSummary>
where
    S: RecordStore,
    R: Rng,
{
    let reference = cache
        .get_or_fetch(&inputs.reference_criteria.name, || {
            store.fetch(&inputs.reference_criteria)
        })?
        .clone();
    let ratios = ActivityRatioTable::from_reference_sample(&reference, rng)?;

    let mut targets = cache
        .get_or_fetch(&inputs.target_criteria.name, || {
            store.fetch(&inputs.target_criteria)
        })?
        .clone();

    let zones = prepare_zones(inputs.zones.clone(), config.zone_buffer_km);
    if zones.is_empty() {
        return Err(ImputationError::config("no usable zones"));
    }

    let index = index_records(&targets, inputs.end);
    match_zones_to_records(&zones, &mut targets, &index, &ratios, processed, config);

    let (batch, summary) = impute_records(&mut targets, inputs.end, &zones, processed, config, rng)?;

    if !batch.is_empty() {
        let updated = store.update(&batch)?;
        if updated != batch.len() {
            warn!("flushed {} updates but store reports {}", batch.len(), updated);
        }
    }

    info!(
        "imputation pass complete: {} resolved, {} unresolved, {} centroid fallbacks, mean displacement {}",
        summary.resolved,
        summary.unresolved,
        summary.centroid_fallbacks,
        summary
            .mean_displacement_m
            .map(|d| format!("{:.0} m", d))
            .unwrap_or_else(|| "n/a".to_string()),
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::Activity;
    use geo::polygon;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn square_zone(id: &str, activity: Activity, center_lat: f64, center_lon: f64) -> Zone {
        let half = 0.005;
        let boundary = polygon![
            (x: center_lon - half, y: center_lat - half),
            (x: center_lon + half, y: center_lat - half),
            (x: center_lon + half, y: center_lat + half),
            (x: center_lon - half, y: center_lat + half),
            (x: center_lon - half, y: center_lat - half),
        ];
        Zone::new(id, activity, boundary, 0.833).unwrap()
    }

    #[test]
    fn test_rejection_sampling_stays_inside_zone() {
        let zone = square_zone("z", Activity::Home, 45.5, -73.5);
        let config = ImputationConfig::default();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..100 {
            let (point, fell_back) = sample_point_in_zone(&zone, &config, &mut rng);
            assert!(!fell_back);
            assert!(zone.contains(&point));
        }
    }

    #[test]
    fn test_exhausted_sampling_falls_back_to_centroid() {
        let zone = square_zone("z", Activity::Home, 45.5, -73.5);
        let config = ImputationConfig {
            max_rejection_attempts: 0,
            ..ImputationConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(11);

        let (point, fell_back) = sample_point_in_zone(&zone, &config, &mut rng);
        assert!(fell_back);
        let centroid = zone.centroid();
        assert_eq!(point.latitude, centroid.latitude);
        assert_eq!(point.longitude, centroid.longitude);
    }

    fn record_near(id: &str, lat: f64, lon: f64, zone_id: &str, weight: f64) -> TripRecord {
        let mut record = TripRecord::new(id, 1.0);
        record.origin = Some(GeoPoint::new(lat, lon));
        record.candidate_zones.insert(zone_id.to_string(), weight);
        record
    }

    #[test]
    fn test_impute_pass_resolves_and_tracks() {
        let zone = square_zone("Z", Activity::Home, 45.5, -73.5);
        let mut records = vec![
            record_near("a", 45.5, -73.5, "Z", 1.0),
            record_near("b", 45.501, -73.499, "Z", 0.5),
            TripRecord::new("empty", 1.0), // no candidates
        ];
        let mut processed = ProcessedIdSet::new();
        let config = ImputationConfig::default();
        let mut rng = StdRng::seed_from_u64(21);

        let (batch, summary) = impute_records(
            &mut records,
            TripEnd::Origin,
            std::slice::from_ref(&zone),
            &mut processed,
            &config,
            &mut rng,
        )
        .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(summary.resolved, 2);
        assert_eq!(summary.unresolved, 1);
        assert!(summary.mean_displacement_m.is_some());

        // Imputed coordinates are inside the assigned zone
        for update in &batch {
            assert!(zone.contains(&update.location));
        }

        // Resolved ids are tracked, the unresolved one is not
        assert!(processed.contains("a"));
        assert!(processed.contains("b"));
        assert!(!processed.contains("empty"));
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let zone = square_zone("Z", Activity::Home, 45.5, -73.5);
        let mut records = vec![record_near("a", 45.5, -73.5, "Z", 1.0)];
        let mut processed = ProcessedIdSet::new();
        let config = ImputationConfig::default();
        let mut rng = StdRng::seed_from_u64(31);

        let (first, _) = impute_records(
            &mut records,
            TripEnd::Origin,
            std::slice::from_ref(&zone),
            &mut processed,
            &config,
            &mut rng,
        )
        .unwrap();
        assert_eq!(first.len(), 1);

        // Same records, same processed set: nothing left to do
        let (second, summary) = impute_records(
            &mut records,
            TripEnd::Origin,
            std::slice::from_ref(&zone),
            &mut processed,
            &config,
            &mut rng,
        )
        .unwrap();
        assert!(second.is_empty());
        assert_eq!(summary.resolved, 0);
        assert_eq!(summary.unresolved, 0);
    }

    #[test]
    fn test_unknown_zone_reference_fails() {
        let zone = square_zone("Z", Activity::Home, 45.5, -73.5);
        let mut records = vec![record_near("a", 45.5, -73.5, "GHOST", 1.0)];
        let mut processed = ProcessedIdSet::new();
        let mut rng = StdRng::seed_from_u64(41);

        let result = impute_records(
            &mut records,
            TripEnd::Origin,
            std::slice::from_ref(&zone),
            &mut processed,
            &ImputationConfig::default(),
            &mut rng,
        );
        assert!(matches!(result, Err(ImputationError::Distribution { .. })));
    }

    #[test]
    fn test_processed_id_set_round_trips_through_serde() {
        let mut processed = ProcessedIdSet::new();
        processed.insert("a");
        processed.insert("b");
        assert!(!processed.insert("a"));

        let json = serde_json::to_string(&processed).unwrap();
        let restored: ProcessedIdSet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 2);
        assert!(restored.contains("a"));
        assert!(restored.contains("b"));
    }
}
