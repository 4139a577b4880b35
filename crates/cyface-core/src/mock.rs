//! Mock sensor implementations for testing.
//!
//! [`MockSensorSource`] implements [`SensorEventSource`] without hardware.
//! Tests push locations and samples through it as if they came from the
//! platform.
//!
//! # Features
//!
//! - **Failure injection**: make `start_updates` fail like a denied permission
//! - **Call counting**: assert how often the capture service subscribed
//! - **Unsubscribe semantics**: updates pushed after `stop_updates` are dropped

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use cyface_types::{Acceleration, GeoLocation};

use crate::error::{Error, Result};
use crate::sensors::{DiskSpaceProbe, SensorEventSource, SensorListener};

/// A scriptable sensor source.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use cyface_core::{CaptureConfig, DataCapturingService, MockSensorSource, PersistenceLayer};
/// use cyface_types::{GeoLocation, Modality, now_millis};
///
/// #[tokio::main]
/// async fn main() -> cyface_core::Result<()> {
///     let sensors = Arc::new(MockSensorSource::new());
///     let service = DataCapturingService::new(
///         CaptureConfig::default(),
///         PersistenceLayer::in_memory()?,
///         sensors.clone(),
///     );
///
///     let measurement = service.start(Modality::Bicycle).await?;
///     sensors.push_location(GeoLocation::new(now_millis(), 51.05, 13.73, 4.0, 5.0));
///     service.stop().await?;
///
///     let loaded = service.persistence().load(measurement.id).await?;
///     assert_eq!(loaded.location_count(), 1);
///     Ok(())
/// }
/// ```
#[derive(Default)]
pub struct MockSensorSource {
    listener: Mutex<Option<Arc<dyn SensorListener>>>,
    should_fail: AtomicBool,
    start_count: AtomicU32,
    stop_count: AtomicU32,
}

impl std::fmt::Debug for MockSensorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSensorSource")
            .field("subscribed", &self.is_subscribed())
            .field("should_fail", &self.should_fail.load(Ordering::Relaxed))
            .field("start_count", &self.start_count())
            .finish()
    }
}

impl MockSensorSource {
    /// Create a new mock source with no subscriber.
    pub fn new() -> Self {
        Self::default()
    }

    fn current_listener(&self) -> Option<Arc<dyn SensorListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make subsequent `start_updates` calls fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Whether a listener is currently subscribed.
    pub fn is_subscribed(&self) -> bool {
        self.current_listener().is_some()
    }

    /// Number of successful `start_updates` calls.
    pub fn start_count(&self) -> u32 {
        self.start_count.load(Ordering::Relaxed)
    }

    /// Number of `stop_updates` calls.
    pub fn stop_count(&self) -> u32 {
        self.stop_count.load(Ordering::Relaxed)
    }

    /// Deliver a location to the subscriber.
    ///
    /// Returns `false` when nobody is subscribed and the update was dropped.
    pub fn push_location(&self, location: GeoLocation) -> bool {
        match self.current_listener() {
            Some(listener) => {
                listener.on_location(location);
                true
            }
            None => false,
        }
    }

    /// Deliver an acceleration sample to the subscriber.
    ///
    /// Returns `false` when nobody is subscribed and the sample was dropped.
    pub fn push_acceleration(&self, sample: Acceleration) -> bool {
        match self.current_listener() {
            Some(listener) => {
                listener.on_acceleration(sample);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SensorEventSource for MockSensorSource {
    async fn start_updates(&self, listener: Arc<dyn SensorListener>) -> Result<()> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::SensorUnavailable("Mock failure".to_string()));
        }
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        self.start_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn stop_updates(&self) -> Result<()> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.stop_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A disk probe reporting a configurable amount of free space.
#[derive(Debug)]
pub struct FixedDiskSpace {
    available: AtomicU64,
}

impl FixedDiskSpace {
    /// Report `available` bytes.
    pub fn new(available: u64) -> Self {
        Self {
            available: AtomicU64::new(available),
        }
    }

    /// Change the reported free space.
    pub fn set_available(&self, available: u64) {
        self.available.store(available, Ordering::Relaxed);
    }
}

impl DiskSpaceProbe for FixedDiskSpace {
    fn available_bytes(&self) -> Option<u64> {
        Some(self.available.load(Ordering::Relaxed))
    }
}
