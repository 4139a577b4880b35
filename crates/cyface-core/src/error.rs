//! Error types for cyface-core.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy | Rationale |
//! |------------|----------|-----------|
//! | [`Error::Lifecycle`] | Fix the caller | The state machine was driven out of order |
//! | [`Error::Store`] | Surface to the user | The in-flight operation failed; a store that stays unavailable needs a restart |
//! | [`Error::SensorUnavailable`] | Do not retry | Hardware is missing or permission was denied |
//! | [`Error::NoActiveMeasurement`] | Do not retry | A lifecycle invariant is already broken |
//! | [`Error::InvalidConfig`] | Do not retry | Fix configuration and restart |

use thiserror::Error;

use cyface_types::MeasurementId;

/// Misuse of the capture state machine.
///
/// These errors are returned synchronously and are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The operation is not allowed while capturing is paused.
    #[error("Capturing is paused")]
    IsPaused,
    /// The operation is not allowed while capturing is running.
    #[error("Capturing is running")]
    IsRunning,
    /// The operation requires a running capture.
    #[error("Capturing is not running")]
    NotRunning,
    /// The operation requires a paused capture.
    #[error("Capturing is not paused")]
    NotPaused,
    /// Capturing is already paused; call resume instead.
    #[error("Capturing is already paused")]
    AlreadyPaused,
    /// Capturing is already running.
    #[error("Capturing is already running")]
    AlreadyRunning,
}

/// Errors that can occur while capturing.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid state transition.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Measurement store error.
    #[error("Store error: {0}")]
    Store(#[from] cyface_store::Error),

    /// The sensor event source could not deliver updates.
    #[error("Sensors unavailable: {0}")]
    SensorUnavailable(String),

    /// A flush ran without an active measurement.
    ///
    /// The flush timer must never outlive the active measurement, so this
    /// indicates a broken invariant rather than a recoverable condition.
    #[error("No active measurement to flush into")]
    NoActiveMeasurement,

    /// The measurement is currently being captured.
    #[error("Measurement {0} is being captured")]
    MeasurementActive(MeasurementId),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias using cyface-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
