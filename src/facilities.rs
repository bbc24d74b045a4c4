//! Nearest-facility assignment and conditional reassignment.
//!
//! Facilities are a small fixed set (a metro line's stations, a handful
//! of terminals), so assignment is an exhaustive scan rather than an
//! index lookup. Reassignment corrects a known misclassification
//! between two subpopulations measured over the same region pair.

use std::collections::HashMap;

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ImputationError, Result};
use crate::geo_utils::haversine_km;
use crate::sampler::sample_weighted;
use crate::{GeoPoint, TripEnd, TripRecord};

/// A fixed point-of-interest records can be snapped to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub id: String,
    pub name: String,
    pub location: GeoPoint,
}

/// The facility nearest to a point.
///
/// Ties break by iteration order: the earlier facility wins the strict
/// `<` comparison. This is a documented policy; callers that care
/// about tie behavior control it by ordering the slice.
pub fn nearest_facility<'a>(point: &GeoPoint, facilities: &'a [Facility]) -> Option<&'a Facility> {
    let mut nearest: Option<&Facility> = None;
    let mut nearest_km = f64::INFINITY;

    for facility in facilities {
        let d = haversine_km(point, &facility.location);
        if d < nearest_km {
            nearest_km = d;
            nearest = Some(facility);
        }
    }

    nearest
}

/// Expansion-weighted volume assigned to each facility.
///
/// Every facility appears in the result, zero-weighted if no record is
/// nearest to it. Records without the relevant endpoint are skipped.
pub fn assignment_counts(
    records: &[TripRecord],
    end: TripEnd,
    facilities: &[Facility],
) -> HashMap<String, f64> {
    let mut counts: HashMap<String, f64> = facilities
        .iter()
        .map(|f| (f.id.clone(), 0.0))
        .collect();

    for record in records {
        let Some(point) = record.end_point(end) else {
            continue;
        };
        if let Some(facility) = nearest_facility(&point, facilities) {
            *counts.entry(facility.id.clone()).or_insert(0.0) += record.expansion_factor;
        }
    }

    counts
}

/// Expansion-weighted fraction of records nearest to each facility.
///
/// The empirical split of endpoints across facilities, usable directly
/// as a sampler distribution. Fails when no record carries the relevant
/// endpoint (the split would be undefined).
pub fn aggregate_ratios(
    records: &[TripRecord],
    end: TripEnd,
    facilities: &[Facility],
) -> Result<HashMap<String, f64>> {
    let counts = assignment_counts(records, end, facilities);
    let total: f64 = counts.values().sum();

    if total <= 0.0 {
        return Err(ImputationError::config(
            "no records with a usable endpoint to split across facilities",
        ));
    }

    Ok(counts.into_iter().map(|(id, c)| (id, c / total)).collect())
}

/// Fraction of a smart-card subpopulation believed to be misclassified.
///
/// Derived by comparing two independently measured volume estimates for
/// the same region pair: a reference survey count and a raw smart-card
/// count. The excess fraction `(smart_card - survey) / smart_card` is
/// the share the survey cannot account for, clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixingRatio(f64);

impl MixingRatio {
    pub fn from_counts(survey_count: f64, smart_card_count: f64) -> Self {
        if smart_card_count <= 0.0 {
            return Self(0.0);
        }
        Self(((smart_card_count - survey_count) / smart_card_count).clamp(0.0, 1.0))
    }

    /// Use a pre-computed ratio directly, clamped to [0, 1].
    pub fn from_ratio(ratio: f64) -> Self {
        Self(ratio.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Conditionally snap a record's endpoint to a facility.
///
/// Draws one uniform value in [0, 1]; at or below the mixing ratio the
/// endpoint is treated as a misclassified member of the other
/// subpopulation and replaced with the exact coordinate of a facility
/// sampled from `target_distribution`. Returns whether a reassignment
/// happened.
pub fn conditional_reassign<R: Rng>(
    record: &mut TripRecord,
    end: TripEnd,
    mixing_ratio: MixingRatio,
    target_distribution: &HashMap<String, f64>,
    facilities: &[Facility],
    rng: &mut R,
) -> Result<bool> {
    let draw: f64 = rng.gen_range(0.0..1.0);
    if draw > mixing_ratio.value() {
        return Ok(false);
    }

    let facility_id = sample_weighted(target_distribution, rng)?.clone();
    let facility = facilities
        .iter()
        .find(|f| f.id == facility_id)
        .ok_or_else(|| {
            ImputationError::config(format!(
                "target distribution references unknown facility {}",
                facility_id
            ))
        })?;

    debug!(
        "reassigning {} of record {} to facility {}",
        end.as_str(),
        record.id,
        facility.name
    );
    record.set_end_point(end, facility.location);
    Ok(true)
}
