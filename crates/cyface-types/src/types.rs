//! Core types for captured trip data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;
use crate::geo;

/// Identifier of a measurement.
///
/// Identifiers are allocated by the store and strictly increase over the
/// store's lifetime; deleted identifiers are never handed out again.
pub type MeasurementId = u64;

/// Transport mode the user declared when starting a capture.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new modes
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[non_exhaustive]
pub enum Modality {
    Bicycle,
    Car,
    Walking,
    Bus,
    Train,
    Motorbike,
    #[default]
    Unknown,
}

impl Modality {
    /// Stable identifier used in the database and on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Bicycle => "BICYCLE",
            Modality::Car => "CAR",
            Modality::Walking => "WALKING",
            Modality::Bus => "BUS",
            Modality::Train => "TRAIN",
            Modality::Motorbike => "MOTORBIKE",
            Modality::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ParseError;

    /// Parse a modality, case-insensitively.
    ///
    /// # Examples
    ///
    /// ```
    /// use cyface_types::Modality;
    ///
    /// assert_eq!("bicycle".parse::<Modality>(), Ok(Modality::Bicycle));
    /// assert_eq!("CAR".parse::<Modality>(), Ok(Modality::Car));
    /// assert!("hovercraft".parse::<Modality>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BICYCLE" | "BIKE" => Ok(Modality::Bicycle),
            "CAR" => Ok(Modality::Car),
            "WALKING" => Ok(Modality::Walking),
            "BUS" => Ok(Modality::Bus),
            "TRAIN" => Ok(Modality::Train),
            "MOTORBIKE" => Ok(Modality::Motorbike),
            "UNKNOWN" => Ok(Modality::Unknown),
            _ => Err(ParseError::UnknownModality(s.to_string())),
        }
    }
}

/// Lifecycle status of a measurement.
///
/// A measurement is `Open` while capturing, `Paused` between a pause and the
/// next resume, `Finished` after stop and `Synchronized` once the collector
/// confirmed the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[non_exhaustive]
pub enum MeasurementStatus {
    Open,
    Paused,
    Finished,
    Synchronized,
}

impl MeasurementStatus {
    /// Stable identifier used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementStatus::Open => "OPEN",
            MeasurementStatus::Paused => "PAUSED",
            MeasurementStatus::Finished => "FINISHED",
            MeasurementStatus::Synchronized => "SYNCHRONIZED",
        }
    }

    /// Whether the measurement is still owned by a capture session.
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        matches!(self, MeasurementStatus::Open | MeasurementStatus::Paused)
    }
}

impl fmt::Display for MeasurementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasurementStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(MeasurementStatus::Open),
            "PAUSED" => Ok(MeasurementStatus::Paused),
            "FINISHED" => Ok(MeasurementStatus::Finished),
            "SYNCHRONIZED" => Ok(MeasurementStatus::Synchronized),
            _ => Err(ParseError::UnknownStatus(s.to_string())),
        }
    }
}

/// A single geographic fix.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GeoLocation {
    /// Capture time in milliseconds since the Unix epoch (UTC).
    pub timestamp: i64,
    /// Latitude in decimal degrees (WGS-84).
    pub latitude: f64,
    /// Longitude in decimal degrees (WGS-84).
    pub longitude: f64,
    /// Speed over ground in metres per second.
    pub speed: f64,
    /// Estimated horizontal accuracy in metres.
    pub accuracy: f64,
}

impl GeoLocation {
    /// Create a new geo-location.
    pub fn new(timestamp: i64, latitude: f64, longitude: f64, speed: f64, accuracy: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            speed,
            accuracy,
        }
    }

    /// Great-circle distance to another fix in metres.
    #[must_use]
    pub fn distance_to(&self, other: &GeoLocation) -> f64 {
        geo::haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Capture time as an [`OffsetDateTime`], if representable.
    pub fn captured_at(&self) -> Option<OffsetDateTime> {
        millis_to_datetime(self.timestamp)
    }
}

/// A single accelerometer sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Acceleration {
    /// Capture time in milliseconds since the Unix epoch (UTC).
    pub timestamp: i64,
    /// Acceleration along the x axis in m/s².
    pub x: f64,
    /// Acceleration along the y axis in m/s².
    pub y: f64,
    /// Acceleration along the z axis in m/s².
    pub z: f64,
}

impl Acceleration {
    /// Create a new acceleration sample.
    pub fn new(timestamp: i64, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, x, y, z }
    }
}

/// A contiguous capture segment of a measurement.
///
/// Every pause/resume cycle ends the current track and opens the next one.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Track {
    /// Position of the track within its measurement, starting at 0.
    pub index: u32,
    /// Geo-locations ordered by timestamp.
    pub geo_locations: Vec<GeoLocation>,
    /// Acceleration samples ordered by timestamp.
    pub accelerations: Vec<Acceleration>,
}

impl Track {
    /// Create an empty track at the given position.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    /// Length of the track in metres.
    ///
    /// Sums the distances between consecutive geo-locations.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.geo_locations
            .windows(2)
            .map(|pair| pair[0].distance_to(&pair[1]))
            .sum()
    }
}

/// One recorded trip, including all of its tracks.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Measurement {
    /// Store-assigned identifier.
    pub id: MeasurementId,
    /// Creation time in milliseconds since the Unix epoch (UTC).
    pub timestamp: i64,
    /// Declared transport mode.
    pub modality: Modality,
    /// Current lifecycle status.
    pub status: MeasurementStatus,
    /// Tracks ordered by index.
    pub tracks: Vec<Track>,
}

impl Measurement {
    /// Whether the collector confirmed this measurement.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.status == MeasurementStatus::Synchronized
    }

    /// Total number of geo-locations across all tracks.
    #[must_use]
    pub fn location_count(&self) -> usize {
        self.tracks.iter().map(|t| t.geo_locations.len()).sum()
    }

    /// Total number of acceleration samples across all tracks.
    #[must_use]
    pub fn acceleration_count(&self) -> usize {
        self.tracks.iter().map(|t| t.accelerations.len()).sum()
    }

    /// Total length in metres. Gaps between tracks do not count.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.tracks.iter().map(Track::length).sum()
    }

    /// First geo-location of the measurement.
    pub fn first_location(&self) -> Option<&GeoLocation> {
        self.tracks.iter().find_map(|t| t.geo_locations.first())
    }

    /// Last geo-location of the measurement.
    pub fn last_location(&self) -> Option<&GeoLocation> {
        self.tracks.iter().rev().find_map(|t| t.geo_locations.last())
    }

    /// Iterate over every geo-location in capture order.
    pub fn geo_locations(&self) -> impl Iterator<Item = &GeoLocation> {
        self.tracks.iter().flat_map(|t| t.geo_locations.iter())
    }

    /// Iterate over every acceleration in capture order.
    pub fn accelerations(&self) -> impl Iterator<Item = &Acceleration> {
        self.tracks.iter().flat_map(|t| t.accelerations.iter())
    }
}

/// Current time in milliseconds since the Unix epoch (UTC).
#[must_use]
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Convert epoch milliseconds into an [`OffsetDateTime`].
pub fn millis_to_datetime(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(timestamp: i64, latitude: f64, longitude: f64) -> GeoLocation {
        GeoLocation::new(timestamp, latitude, longitude, 5.0, 8.0)
    }

    #[test]
    fn test_modality_round_trips_through_str() {
        for modality in [
            Modality::Bicycle,
            Modality::Car,
            Modality::Walking,
            Modality::Bus,
            Modality::Train,
            Modality::Motorbike,
            Modality::Unknown,
        ] {
            assert_eq!(modality.as_str().parse::<Modality>(), Ok(modality));
        }
    }

    #[test]
    fn test_modality_bike_alias() {
        assert_eq!("bike".parse::<Modality>(), Ok(Modality::Bicycle));
    }

    #[test]
    fn test_status_parse_rejects_lowercase() {
        assert!("open".parse::<MeasurementStatus>().is_err());
        assert_eq!(
            "FINISHED".parse::<MeasurementStatus>(),
            Ok(MeasurementStatus::Finished)
        );
    }

    #[test]
    fn test_status_is_capturing() {
        assert!(MeasurementStatus::Open.is_capturing());
        assert!(MeasurementStatus::Paused.is_capturing());
        assert!(!MeasurementStatus::Finished.is_capturing());
        assert!(!MeasurementStatus::Synchronized.is_capturing());
    }

    #[test]
    fn test_measurement_counts_and_endpoints() {
        let mut first = Track::new(0);
        first.geo_locations.push(location(1_000, 51.05, 13.73));
        first.geo_locations.push(location(2_000, 51.06, 13.73));
        first.accelerations.push(Acceleration::new(1_000, 0.1, 0.2, 9.8));

        let mut second = Track::new(1);
        second.geo_locations.push(location(9_000, 51.10, 13.80));
        second
            .accelerations
            .extend([Acceleration::new(9_000, 0.0, 0.0, 9.8); 2]);

        let measurement = Measurement {
            id: 1,
            timestamp: 1_000,
            modality: Modality::Bicycle,
            status: MeasurementStatus::Finished,
            tracks: vec![first, second, Track::new(2)],
        };

        assert_eq!(measurement.location_count(), 3);
        assert_eq!(measurement.acceleration_count(), 3);
        assert_eq!(measurement.first_location().unwrap().timestamp, 1_000);
        assert_eq!(measurement.last_location().unwrap().timestamp, 9_000);
        assert!(!measurement.is_synchronized());
    }

    #[test]
    fn test_length_ignores_gap_between_tracks() {
        let mut first = Track::new(0);
        first.geo_locations.push(location(0, 51.0, 13.0));
        first.geo_locations.push(location(1, 51.001, 13.0));
        let mut second = Track::new(1);
        second.geo_locations.push(location(2, 52.0, 13.0));

        let measurement = Measurement {
            id: 7,
            timestamp: 0,
            modality: Modality::Car,
            status: MeasurementStatus::Finished,
            tracks: vec![first.clone(), second],
        };

        // ~111 m between the first two fixes; the jump to 52°N is a pause gap.
        assert!((measurement.length() - first.length()).abs() < f64::EPSILON);
        assert!((first.length() - 111.19).abs() < 0.5);
    }

    #[test]
    fn test_millis_to_datetime() {
        let dt = millis_to_datetime(1_500).unwrap();
        assert_eq!(dt.unix_timestamp(), 1);
        assert_eq!(dt.millisecond(), 500);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_modality_serde_uses_screaming_case() {
        let json = serde_json::to_string(&Modality::Bicycle).unwrap();
        assert_eq!(json, "\"BICYCLE\"");
    }
}
