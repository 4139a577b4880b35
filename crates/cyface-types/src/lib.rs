//! Platform-agnostic types for the Cyface capture SDK.
//!
//! This crate provides the value types shared by the store, the capture
//! lifecycle and the synchronizer.
//!
//! # Features
//!
//! - Sensor points: [`GeoLocation`] and [`Acceleration`]
//! - The [`Measurement`] aggregate and its [`Track`]s
//! - Transport modes and measurement status enums
//! - Geodesic distance helpers
//!
//! # Example
//!
//! ```
//! use cyface_types::{GeoLocation, Track};
//!
//! let mut track = Track::new(0);
//! track.geo_locations.push(GeoLocation::new(0, 51.0, 13.0, 0.0, 5.0));
//! track.geo_locations.push(GeoLocation::new(1_000, 51.001, 13.0, 4.0, 5.0));
//! assert!(track.length() > 100.0);
//! ```

pub mod error;
pub mod geo;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    Acceleration, GeoLocation, Measurement, MeasurementId, MeasurementStatus, Modality, Track,
    millis_to_datetime, now_millis,
};
