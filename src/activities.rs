//! Trip-purpose categories and the weighted activity-ratio estimator.
//!
//! Survey records carry free-form purpose codes; zones carry one of
//! seven canonical activity categories. The estimator folds a weighted
//! reference sample into a ratio table over those categories, resolving
//! ambiguous purpose codes with uniform random draws.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ImputationError, Result};
use crate::TripRecord;

/// Canonical activity categories for zones and ratio tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Home,
    Shopping,
    Work,
    Health,
    Leisure,
    School,
    Transfer,
}

impl Activity {
    pub const ALL: [Activity; 7] = [
        Activity::Home,
        Activity::Shopping,
        Activity::Work,
        Activity::Health,
        Activity::Leisure,
        Activity::School,
        Activity::Transfer,
    ];

    /// The six categories a work-related purpose can resolve to.
    /// Work trips never terminate a home stay.
    const NON_HOME: [Activity; 6] = [
        Activity::Shopping,
        Activity::Work,
        Activity::Health,
        Activity::Leisure,
        Activity::School,
        Activity::Transfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Home => "home",
            Activity::Shopping => "shopping",
            Activity::Work => "work",
            Activity::Health => "health",
            Activity::Leisure => "leisure",
            Activity::School => "school",
            Activity::Transfer => "transfer",
        }
    }

    /// Parse a zone activity label.
    pub fn from_label(label: &str) -> Option<Activity> {
        match label {
            "home" => Some(Activity::Home),
            "shopping" => Some(Activity::Shopping),
            "work" => Some(Activity::Work),
            "health" => Some(Activity::Health),
            "leisure" => Some(Activity::Leisure),
            "school" => Some(Activity::School),
            "transfer" => Some(Activity::Transfer),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Activity::Home => 0,
            Activity::Shopping => 1,
            Activity::Work => 2,
            Activity::Health => 3,
            Activity::Leisure => 4,
            Activity::School => 5,
            Activity::Transfer => 6,
        }
    }
}

/// Purpose code attached to a survey trip record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PurposeCode {
    Home,
    VisitingFriends,
    Shopping,
    Leisure,
    Medical,
    SchoolUsual,
    Unknown,
    Other,
    FetchSomeone,
    DropSomeone,
    WorkUsual,
    WorkNonUsual,
    OnTheRoad,
}

impl PurposeCode {
    /// Parse a raw purpose code as stored in the trip table.
    pub fn from_code(code: &str) -> Option<PurposeCode> {
        match code {
            "home" => Some(PurposeCode::Home),
            "visitingFriends" => Some(PurposeCode::VisitingFriends),
            "shopping" => Some(PurposeCode::Shopping),
            "leisure" => Some(PurposeCode::Leisure),
            "medical" => Some(PurposeCode::Medical),
            "schoolUsual" => Some(PurposeCode::SchoolUsual),
            "unknown" => Some(PurposeCode::Unknown),
            "other" => Some(PurposeCode::Other),
            "fetchSomeone" => Some(PurposeCode::FetchSomeone),
            "dropSomeone" => Some(PurposeCode::DropSomeone),
            "workUsual" => Some(PurposeCode::WorkUsual),
            "workNonUsual" => Some(PurposeCode::WorkNonUsual),
            "onTheRoad" => Some(PurposeCode::OnTheRoad),
            _ => None,
        }
    }

    /// Resolve this purpose code to an activity category.
    ///
    /// Deterministic codes map directly. Ambiguous codes draw uniformly:
    /// over all seven categories for unknown-type codes, over the six
    /// non-home categories for work-type codes.
    pub fn resolve<R: Rng>(&self, rng: &mut R) -> Activity {
        match self {
            PurposeCode::Home | PurposeCode::VisitingFriends => Activity::Home,
            PurposeCode::Shopping => Activity::Shopping,
            PurposeCode::Leisure => Activity::Leisure,
            PurposeCode::Medical => Activity::Health,
            PurposeCode::SchoolUsual => Activity::School,
            PurposeCode::Unknown
            | PurposeCode::Other
            | PurposeCode::FetchSomeone
            | PurposeCode::DropSomeone => Activity::ALL[rng.gen_range(0..Activity::ALL.len())],
            PurposeCode::WorkUsual | PurposeCode::WorkNonUsual | PurposeCode::OnTheRoad => {
                Activity::NON_HOME[rng.gen_range(0..Activity::NON_HOME.len())]
            }
        }
    }
}

/// Ratio of each activity category in a reference sample.
///
/// Ratios sum to 1 for any non-empty input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRatioTable {
    ratios: [f64; 7],
}

impl ActivityRatioTable {
    /// Build a table from pre-computed ratios, in `Activity::ALL` order.
    pub fn new(ratios: [f64; 7]) -> Self {
        Self { ratios }
    }

    /// Estimate ratios from a weighted reference sample.
    ///
    /// Each record contributes its `expansion_factor` to the category
    /// its purpose code resolves to. Records without a purpose code are
    /// skipped. Fails when no record contributes anything.
    pub fn from_reference_sample<R: Rng>(records: &[TripRecord], rng: &mut R) -> Result<Self> {
        if records.is_empty() {
            return Err(ImputationError::config("reference sample is empty"));
        }

        let mut totals = [0.0f64; 7];
        for record in records {
            if let Some(purpose) = record.purpose {
                let activity = purpose.resolve(rng);
                totals[activity.index()] += record.expansion_factor;
            }
        }

        let grand_total: f64 = totals.iter().sum();
        if grand_total <= 0.0 {
            return Err(ImputationError::config(
                "reference sample has no usable purpose codes",
            ));
        }

        let mut ratios = [0.0f64; 7];
        for (ratio, total) in ratios.iter_mut().zip(totals.iter()) {
            *ratio = total / grand_total;
        }

        Ok(Self { ratios })
    }

    /// Ratio for one category, in [0, 1].
    pub fn ratio(&self, activity: Activity) -> f64 {
        self.ratios[activity.index()]
    }
}

/// Expansion-weighted volume of a record set.
///
/// The population-scale count a sample represents, used for run
/// summaries and mixing-ratio inputs.
pub fn weighted_count(records: &[TripRecord]) -> f64 {
    records.iter().map(|r| r.expansion_factor).sum()
}
