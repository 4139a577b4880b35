//! Capture event system.
//!
//! The capture service and the synchronizer publish [`CapturingEvent`]s on a
//! shared broadcast channel. UI layers subscribe to show progress; the
//! synchronizer subscribes to learn when a measurement has been finished.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use cyface_types::{GeoLocation, MeasurementId, Modality};

use crate::filter::LocationRejection;

/// Events emitted while capturing and synchronizing.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum CapturingEvent {
    /// A new measurement was created and sensors are delivering data.
    ServiceStarted {
        measurement_id: MeasurementId,
        modality: Modality,
    },
    /// Capturing was paused; buffered data has been flushed.
    ServicePaused { measurement_id: MeasurementId },
    /// Capturing resumed into a new track.
    ServiceResumed {
        measurement_id: MeasurementId,
        track: u32,
    },
    /// Capturing stopped and the measurement is finished.
    ServiceStopped { measurement_id: MeasurementId },
    /// A location passed the quality filter.
    GeoLocationAcquired { location: GeoLocation },
    /// A location was discarded by the quality filter.
    LocationRejected { reason: LocationRejection },
    /// Buffered data was persisted.
    DataFlushed {
        measurement_id: MeasurementId,
        locations: usize,
        accelerations: usize,
    },
    /// Free space on the storage volume dropped below the configured threshold.
    LowDiskSpace { available_bytes: u64 },
    /// An upload attempt started.
    SynchronizationStarted { measurement_id: MeasurementId },
    /// The collector accepted a measurement.
    SynchronizationSucceeded { measurement_id: MeasurementId },
    /// An upload attempt failed; the measurement stays pending.
    SynchronizationFailed {
        measurement_id: MeasurementId,
        error: String,
    },
    /// A background task hit an error it could not return to a caller.
    Error { message: String },
}

/// Sender for capture events.
pub type EventSender = broadcast::Sender<CapturingEvent>;

/// Receiver for capture events.
pub type EventReceiver = broadcast::Receiver<CapturingEvent>;

/// Event dispatcher for sending events to multiple receivers.
///
/// Cloning the dispatcher shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: CapturingEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
