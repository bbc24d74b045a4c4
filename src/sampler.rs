//! Weighted random sampling over discrete key-to-weight mappings.

use std::collections::HashMap;
use std::hash::Hash;

use rand::Rng;

use crate::error::{ImputationError, Result};

/// Draw one key from a non-negative weight mapping.
///
/// Weights need not be normalized. The draw is uniform in `[0, total)`;
/// the first key whose cumulative weight exceeds the draw wins. Fails
/// when the mapping is empty, holds a negative weight, or the total is
/// zero or non-finite.
pub fn sample_weighted<'a, K, R>(weights: &'a HashMap<K, f64>, rng: &mut R) -> Result<&'a K>
where
    K: Eq + Hash,
    R: Rng,
{
    if weights.is_empty() {
        return Err(ImputationError::distribution("weight mapping is empty"));
    }

    // Snapshot the entries so one draw walks one consistent ordering.
    let entries: Vec<(&K, f64)> = weights.iter().map(|(k, &w)| (k, w)).collect();

    let mut total = 0.0;
    for &(_, weight) in &entries {
        if weight < 0.0 || !weight.is_finite() {
            return Err(ImputationError::distribution(format!(
                "invalid weight {} in mapping",
                weight
            )));
        }
        total += weight;
    }

    if total <= 0.0 {
        return Err(ImputationError::distribution("total weight is zero"));
    }

    let draw = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for &(key, weight) in &entries {
        cumulative += weight;
        if draw < cumulative {
            return Ok(key);
        }
    }

    // Floating-point accumulation can leave the draw a hair past the
    // final cumulative value; the last positively-weighted key owns it.
    entries
        .iter()
        .rev()
        .find(|&&(_, w)| w > 0.0)
        .map(|&(k, _)| k)
        .ok_or_else(|| ImputationError::distribution("total weight is zero"))
}
