//! Data models for stored data.

use serde::{Deserialize, Serialize};

use cyface_types::{MeasurementId, MeasurementStatus, Modality};

/// Summary row of a stored measurement, without its sensor points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMeasurement {
    /// Measurement identifier.
    pub id: MeasurementId,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
    /// Declared transport mode.
    pub modality: Modality,
    /// Current status.
    pub status: MeasurementStatus,
    /// Number of tracks.
    pub track_count: u32,
    /// Number of geo-locations across all tracks.
    pub location_count: u64,
    /// Number of acceleration samples across all tracks.
    pub acceleration_count: u64,
}

impl StoredMeasurement {
    /// Whether the collector confirmed this measurement.
    pub fn is_synchronized(&self) -> bool {
        self.status == MeasurementStatus::Synchronized
    }
}

/// One CSV export row.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct LocationRow {
    pub measurement_id: MeasurementId,
    pub track: u32,
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub accuracy: f64,
}
