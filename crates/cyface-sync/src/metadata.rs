//! Upload metadata.
//!
//! Every upload carries a set of multipart text fields describing the
//! measurement next to the binary payload.

use serde::Serialize;

use cyface_types::{GeoLocation, Measurement, MeasurementId};

use crate::config::DeviceMetadata;
use crate::error::SerializationError;

/// File extension of the binary payload.
pub const FILE_EXTENSION: &str = "cyf";

/// Form field carrying the binary payload.
pub const PAYLOAD_FIELD: &str = "fileToUpload";

/// Descriptive fields sent with an upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    /// Installation identifier.
    pub device_id: String,
    /// Measurement identifier.
    pub measurement_id: MeasurementId,
    /// Device model.
    pub device_type: String,
    /// Operating system version.
    pub os_version: String,
    /// Application version.
    pub app_version: String,
    /// Track length in metres.
    pub length: f64,
    /// Number of geo-locations.
    pub location_count: usize,
    /// First geo-location.
    pub start_location: GeoLocation,
    /// Last geo-location.
    pub end_location: GeoLocation,
}

impl UploadMetadata {
    /// Describe `measurement` for the installation `device_id`.
    ///
    /// Fails with [`SerializationError::NoLocations`] when there is no
    /// geo-location to take start and end from.
    pub fn from_measurement(
        device_id: &str,
        measurement: &Measurement,
        device: &DeviceMetadata,
    ) -> Result<Self, SerializationError> {
        let (start_location, end_location) = measurement
            .first_location()
            .zip(measurement.last_location())
            .ok_or(SerializationError::NoLocations(measurement.id))?;

        Ok(Self {
            device_id: device_id.to_string(),
            measurement_id: measurement.id,
            device_type: device.device_type.clone(),
            os_version: device.os_version.clone(),
            app_version: device.app_version.clone(),
            length: measurement.length(),
            location_count: measurement.location_count(),
            start_location: *start_location,
            end_location: *end_location,
        })
    }

    /// Payload file name: `<deviceId>_<measurementId>.cyf`.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.{}",
            self.device_id, self.measurement_id, FILE_EXTENSION
        )
    }

    /// Multipart text fields in wire order.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("deviceId", self.device_id.clone()),
            ("measurementId", self.measurement_id.to_string()),
            ("deviceType", self.device_type.clone()),
            ("osVersion", self.os_version.clone()),
            ("appVersion", self.app_version.clone()),
            ("length", self.length.to_string()),
            ("locationCount", self.location_count.to_string()),
            ("startLocationLat", self.start_location.latitude.to_string()),
            ("startLocationLon", self.start_location.longitude.to_string()),
            ("startLocationTs", self.start_location.timestamp.to_string()),
            ("endLocationLat", self.end_location.latitude.to_string()),
            ("endLocationLon", self.end_location.longitude.to_string()),
            ("endLocationTs", self.end_location.timestamp.to_string()),
        ]
    }
}
