//! Sensor source abstractions.
//!
//! The platform (GPS receiver, accelerometer driver, OS location service)
//! sits behind [`SensorEventSource`]. Capture code only ever sees the
//! callbacks on [`SensorListener`], which makes it testable with
//! [`MockSensorSource`](crate::mock::MockSensorSource).

use std::sync::Arc;

use async_trait::async_trait;

use cyface_types::{Acceleration, GeoLocation};

use crate::error::Result;

/// A location fix as delivered by the platform.
pub type LocationUpdate = GeoLocation;

/// An accelerometer sample as delivered by the platform.
pub type AccelerometerSample = Acceleration;

/// Receives sensor updates.
///
/// Callbacks may arrive on any thread and must not block.
pub trait SensorListener: Send + Sync {
    /// A new location fix is available.
    fn on_location(&self, location: LocationUpdate);

    /// A new accelerometer sample is available.
    fn on_acceleration(&self, sample: AccelerometerSample);
}

/// Source of location and acceleration updates.
#[async_trait]
pub trait SensorEventSource: Send + Sync {
    /// Begin delivering updates to `listener`.
    ///
    /// Fails with [`Error::SensorUnavailable`](crate::Error::SensorUnavailable)
    /// when the hardware is missing or permission was denied.
    async fn start_updates(&self, listener: Arc<dyn SensorListener>) -> Result<()>;

    /// Stop delivering updates.
    ///
    /// After this returns no further callbacks reach the previous listener.
    async fn stop_updates(&self) -> Result<()>;
}

/// Reports free space on the storage volume.
pub trait DiskSpaceProbe: Send + Sync {
    /// Available bytes, or `None` when the platform cannot tell.
    fn available_bytes(&self) -> Option<u64>;
}
