//! Location sample filter.
//!
//! Rejects fixes that should never reach the path: low-accuracy fixes and
//! fixes whose coordinates are not on the globe. Speed is deliberately not a
//! rejection criterion.

use tracing::trace;

use crate::sample::LocationSample;

/// Default accuracy bound; fixes reporting a larger error radius are dropped.
pub const DEFAULT_MAX_ACCURACY_M: f64 = 50.0;

/// Why a sample was rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// Reported accuracy radius exceeds the configured bound.
    LowAccuracy {
        /// Reported accuracy.
        accuracy_m: f64,
        /// Configured bound.
        limit_m: f64,
    },
    /// Latitude or longitude is non-finite or out of range.
    InvalidCoordinate,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowAccuracy {
                accuracy_m,
                limit_m,
            } => write!(f, "accuracy {accuracy_m:.1} m exceeds {limit_m:.1} m"),
            Self::InvalidCoordinate => write!(f, "invalid coordinate"),
        }
    }
}

/// Result of filtering a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterResult {
    /// The sample may be applied.
    Accepted,
    /// The sample must be dropped.
    Rejected(RejectReason),
}

impl FilterResult {
    /// Whether the sample was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Configuration for the sample filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    /// Largest acceptable accuracy radius in metres.
    pub max_accuracy_m: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: DEFAULT_MAX_ACCURACY_M,
        }
    }
}

/// Pure predicate over incoming samples.
#[derive(Debug, Clone, Default)]
pub struct SampleFilter {
    config: FilterConfig,
}

impl SampleFilter {
    /// Create a filter with the given configuration.
    #[must_use]
    pub fn with_config(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Check a sample and say why it was rejected, if it was.
    #[must_use]
    pub fn check(&self, sample: &LocationSample) -> FilterResult {
        if !valid_coordinate(sample.latitude, sample.longitude) {
            trace!(
                latitude = sample.latitude,
                longitude = sample.longitude,
                "Sample rejected: invalid coordinate"
            );
            return FilterResult::Rejected(RejectReason::InvalidCoordinate);
        }

        if let Some(accuracy_m) = sample.accuracy_m {
            if accuracy_m > self.config.max_accuracy_m {
                trace!(accuracy_m, "Sample rejected: low accuracy");
                return FilterResult::Rejected(RejectReason::LowAccuracy {
                    accuracy_m,
                    limit_m: self.config.max_accuracy_m,
                });
            }
        }

        FilterResult::Accepted
    }

    /// Whether a sample should be applied.
    #[must_use]
    pub fn accept(&self, sample: &LocationSample) -> bool {
        self.check(sample).is_accepted()
    }
}

fn valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}
