//! Local measurement persistence for the Cyface capture SDK.
//!
//! This crate provides SQLite-based storage for captured trips: measurements,
//! their tracks, geo-locations and acceleration samples.
//!
//! # Features
//!
//! - Monotonic measurement identifiers that are never reused
//! - Transactional batch appends to the current track
//! - Cascading delete and acceleration cleanup after upload
//! - Summary queries by status and transport mode
//! - Key/value preferences and CSV export
//!
//! # Example
//!
//! ```no_run
//! use cyface_store::Store;
//! use cyface_types::{GeoLocation, Modality};
//!
//! let store = Store::open_default()?;
//! let measurement = store.create_measurement(10_000, Modality::Bicycle)?;
//! store.save(measurement.id, &[GeoLocation::new(10_000, 51.05, 13.73, 4.0, 8.0)], &[])?;
//!
//! let loaded = store.load(measurement.id)?;
//! assert_eq!(loaded.location_count(), 1);
//! # Ok::<(), cyface_store::Error>(())
//! ```

mod error;
mod models;
mod preferences;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::StoredMeasurement;
pub use preferences::{MemoryPreferences, Preferences};
pub use queries::MeasurementQuery;
pub use schema::SCHEMA_VERSION;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/cyface/measurements.db`
/// - macOS: `~/Library/Application Support/cyface/measurements.db`
/// - Windows: `C:\Users\<user>\AppData\Local\cyface\measurements.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("cyface")
        .join("measurements.db")
}
