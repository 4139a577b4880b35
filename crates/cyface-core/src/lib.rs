//! Capture engine for the Cyface capture SDK.
//!
//! This crate turns a stream of platform sensor updates into persisted
//! measurements: it owns the capture lifecycle, filters low-quality
//! locations, buffers points in memory and flushes them to the local store.
//!
//! # Features
//!
//! - **Lifecycle**: `start`, `pause`, `resume` and `stop` with typed misuse errors
//! - **Location filter**: drops fixes that are inaccurate or out of date
//! - **Periodic flush**: buffered points reach the store every flush interval
//! - **No data loss on stop**: a final flush runs after sensors are unsubscribed
//! - **Events**: broadcast notifications for UI layers and the synchronizer
//! - **Installation identifier**: persisted random UUID per installation
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use cyface_core::{CaptureConfig, CaptureState, DataCapturingService, MockSensorSource, PersistenceLayer};
//! use cyface_types::Modality;
//!
//! #[tokio::main]
//! async fn main() -> cyface_core::Result<()> {
//!     let service = DataCapturingService::new(
//!         CaptureConfig::default(),
//!         PersistenceLayer::in_memory()?,
//!         Arc::new(MockSensorSource::new()),
//!     );
//!
//!     let measurement = service.start(Modality::Walking).await?;
//!     assert_eq!(service.state().await, CaptureState::Running);
//!
//!     let finished = service.stop().await?;
//!     assert_eq!(finished.id, measurement.id);
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod installation;
pub mod lifecycle;
pub mod mock;
pub mod persistence;
pub mod sensors;

pub use buffer::{BufferSnapshot, CaptureBuffer};
pub use config::{CaptureConfig, ConfigError, StorageConfig, ValidationError};
pub use error::{Error, LifecycleError, Result};
pub use events::{CapturingEvent, EventDispatcher, EventReceiver, EventSender};
pub use filter::{LocationFilter, LocationRejection};
pub use installation::{INSTALLATION_ID_KEY, InstallationIdentifier};
pub use lifecycle::{CaptureState, DataCapturingService};
pub use mock::{FixedDiskSpace, MockSensorSource};
pub use persistence::PersistenceLayer;
pub use sensors::{
    AccelerometerSample, DiskSpaceProbe, LocationUpdate, SensorEventSource, SensorListener,
};

// Re-export from cyface-store and cyface-types
pub use cyface_store::{MeasurementQuery, StoredMeasurement};
pub use cyface_types::{
    Acceleration, GeoLocation, Measurement, MeasurementId, MeasurementStatus, Modality, Track,
};
