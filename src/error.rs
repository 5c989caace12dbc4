//! Error types for metric registration and recording.

use crate::registry::MetricKind;

/// Errors raised by [`MetricRegistry`](crate::registry::MetricRegistry) and its instruments.
///
/// Recording errors (`InvalidAmount`, `InvalidObservation`) are returned
/// before any state is touched, so a rejected call leaves the instrument
/// unchanged.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metric '{name}' is already registered as a {existing} with a different definition (requested {requested})")]
    DuplicateNameConflict {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("invalid definition for metric '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("counter '{name}' rejected amount {amount}: must be finite and >= 0")]
    InvalidAmount { name: String, amount: f64 },

    #[error("histogram '{name}' rejected observation {value}: must be finite and >= 0")]
    InvalidObservation { name: String, value: f64 },

    #[error("metric '{name}' is a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: MetricKind,
        actual: MetricKind,
    },

    #[error("metric '{name}' expects {expected} label values, got {got}")]
    LabelMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("prometheus backend error: {0}")]
    Backend(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Result alias used throughout the metrics layer.
pub type Result<T> = std::result::Result<T, MetricsError>;
