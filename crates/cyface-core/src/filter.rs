//! Location quality filter.
//!
//! Fixes from the platform location provider are only kept when they are
//! accurate enough and fresh enough. Everything else is dropped before it
//! reaches the capture buffer.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cyface_types::GeoLocation;

use crate::config::CaptureConfig;

/// Default accuracy limit in metres.
pub const DEFAULT_MAX_ACCURACY: f64 = 20.0;

/// Default tolerance between a fix's timestamp and the current time.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(10);

/// Why a location was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationRejection {
    /// The reported accuracy exceeds the limit.
    Inaccurate { accuracy: f64, max_accuracy: f64 },
    /// The fix timestamp is too far from the current time.
    OutOfDate { offset_ms: i64, max_offset_ms: i64 },
}

impl fmt::Display for LocationRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationRejection::Inaccurate {
                accuracy,
                max_accuracy,
            } => write!(f, "accuracy {accuracy:.1} m exceeds {max_accuracy:.1} m"),
            LocationRejection::OutOfDate {
                offset_ms,
                max_offset_ms,
            } => write!(f, "timestamp is {offset_ms} ms off (limit {max_offset_ms} ms)"),
        }
    }
}

/// Accepts or rejects incoming locations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFilter {
    max_accuracy: f64,
    max_age: Duration,
}

impl Default for LocationFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ACCURACY, DEFAULT_MAX_AGE)
    }
}

impl LocationFilter {
    /// Create a filter with explicit limits.
    pub fn new(max_accuracy: f64, max_age: Duration) -> Self {
        Self {
            max_accuracy,
            max_age,
        }
    }

    /// Create a filter from capture configuration.
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.max_location_accuracy, config.max_location_age())
    }

    /// Check a location against the filter at time `now_ms`.
    ///
    /// A location passes when its accuracy is at most the limit and its
    /// timestamp differs from `now_ms` by at most the age tolerance.
    pub fn check(&self, location: &GeoLocation, now_ms: i64) -> Result<(), LocationRejection> {
        if location.accuracy > self.max_accuracy || location.accuracy.is_nan() {
            return Err(LocationRejection::Inaccurate {
                accuracy: location.accuracy,
                max_accuracy: self.max_accuracy,
            });
        }

        let max_offset_ms = i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX);
        let offset_ms = now_ms.saturating_sub(location.timestamp);
        if offset_ms.saturating_abs() > max_offset_ms {
            return Err(LocationRejection::OutOfDate {
                offset_ms,
                max_offset_ms,
            });
        }

        Ok(())
    }

    /// Whether the location passes the filter at time `now_ms`.
    pub fn accepts(&self, location: &GeoLocation, now_ms: i64) -> bool {
        self.check(location, now_ms).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn fix(timestamp: i64, accuracy: f64) -> GeoLocation {
        GeoLocation::new(timestamp, 51.05, 13.73, 5.0, accuracy)
    }

    #[test]
    fn test_inaccurate_location_rejected() {
        let filter = LocationFilter::default();
        let result = filter.check(&fix(NOW, 25.0), NOW);
        assert!(matches!(
            result,
            Err(LocationRejection::Inaccurate { accuracy, .. }) if accuracy == 25.0
        ));
    }

    #[test]
    fn test_recent_accurate_location_kept() {
        let filter = LocationFilter::default();
        assert!(filter.accepts(&fix(NOW - 5_000, 15.0), NOW));
    }

    #[test]
    fn test_limits_are_inclusive() {
        let filter = LocationFilter::default();
        assert!(filter.accepts(&fix(NOW - 10_000, 20.0), NOW));
        assert!(!filter.accepts(&fix(NOW - 10_001, 20.0), NOW));
        assert!(!filter.accepts(&fix(NOW, 20.01), NOW));
    }

    #[test]
    fn test_future_timestamps_rejected() {
        let filter = LocationFilter::default();
        let result = filter.check(&fix(NOW + 30_000, 5.0), NOW);
        assert!(matches!(
            result,
            Err(LocationRejection::OutOfDate { offset_ms: -30_000, .. })
        ));
    }

    #[test]
    fn test_nan_accuracy_rejected() {
        let filter = LocationFilter::default();
        assert!(!filter.accepts(&fix(NOW, f64::NAN), NOW));
    }

    #[test]
    fn test_rejection_display() {
        let reason = LocationRejection::Inaccurate {
            accuracy: 25.0,
            max_accuracy: 20.0,
        };
        assert_eq!(reason.to_string(), "accuracy 25.0 m exceeds 20.0 m");
    }
}
