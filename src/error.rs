//! Unified error handling for the od-imputer library.
//!
//! One error type covers the whole pipeline. Store and distribution
//! failures are fatal for a run; geometry failures are recoverable at
//! the zone level (the zone is skipped and the run continues).

use std::fmt;

/// Unified error type for imputation operations.
#[derive(Debug, Clone)]
pub enum ImputationError {
    /// Reference data is missing or unusable
    Config { message: String },
    /// Record store query or update failure
    Store { message: String },
    /// Weighted sampler invoked over an empty or zero-weight distribution
    Distribution { message: String },
    /// Degenerate zone geometry
    Geometry { zone_id: String, message: String },
}

impl ImputationError {
    pub fn config(message: impl Into<String>) -> Self {
        ImputationError::Config {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        ImputationError::Store {
            message: message.into(),
        }
    }

    pub fn distribution(message: impl Into<String>) -> Self {
        ImputationError::Distribution {
            message: message.into(),
        }
    }

    pub fn geometry(zone_id: impl Into<String>, message: impl Into<String>) -> Self {
        ImputationError::Geometry {
            zone_id: zone_id.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ImputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImputationError::Config { message } => {
                write!(f, "Configuration error: {}", message)
            }
            ImputationError::Store { message } => {
                write!(f, "Record store error: {}", message)
            }
            ImputationError::Distribution { message } => {
                write!(f, "Distribution error: {}", message)
            }
            ImputationError::Geometry { zone_id, message } => {
                write!(f, "Zone '{}' has degenerate geometry: {}", zone_id, message)
            }
        }
    }
}

impl std::error::Error for ImputationError {}

/// Result type alias for imputation operations.
pub type Result<T> = std::result::Result<T, ImputationError>;
